use super::*;

use crate::db::{ChatRecord, StoredMessage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatSummary {
    id: String,
    title: String,
    created_at: String,
    updated_at: String,
}

impl From<ChatRecord> for ChatSummary {
    fn from(chat: ChatRecord) -> Self {
        Self {
            id: chat.id,
            title: chat.title,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MessageView {
    id: String,
    role: String,
    content: String,
    files: Option<serde_json::Value>,
    created_at: String,
}

impl From<StoredMessage> for MessageView {
    fn from(msg: StoredMessage) -> Self {
        // Attachments that no longer parse are shown as absent.
        let files = msg
            .files
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: msg.id,
            role: msg.role,
            content: msg.content,
            files,
            created_at: msg.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ChatDetail {
    #[serde(flatten)]
    chat: ChatSummary,
    messages: Vec<MessageView>,
}

pub(super) async fn api_list_chats(
    headers: HeaderMap,
    State(state): State<WebState>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let chats = call_blocking(state.app_state.db.clone(), move |db| {
        db.list_chats_for_user(&caller.user_id)
    })
    .await?;
    Ok(Json(chats.into_iter().map(ChatSummary::from).collect()))
}

pub(super) async fn api_get_chat(
    headers: HeaderMap,
    State(state): State<WebState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatDetail>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let chat = load_owned_chat(&state, &caller, &chat_id).await?;
    let messages =
        call_blocking(state.app_state.db.clone(), move |db| db.get_chat_messages(&chat_id)).await?;
    Ok(Json(ChatDetail {
        chat: chat.into(),
        messages: messages.into_iter().map(MessageView::from).collect(),
    }))
}

pub(super) async fn api_delete_chat(
    headers: HeaderMap,
    State(state): State<WebState>,
    Path(chat_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    load_owned_chat(&state, &caller, &chat_id).await?;
    let deleted = call_blocking(state.app_state.db.clone(), move |db| db.delete_chat(&chat_id)).await?;
    info!(target: "web", deleted, "Deleted chat");
    Ok(Json(json!({"success": true})))
}

pub(super) async fn api_memories(
    headers: HeaderMap,
    State(state): State<WebState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let memories =
        call_blocking(state.app_state.db.clone(), move |db| db.get_memories(&caller.user_id))
            .await?;
    Ok(Json(json!(memories)))
}
