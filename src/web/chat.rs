use super::*;
use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderName, HeaderValue};
use futures_util::StreamExt;
use tracing::warn;

use crate::db::{now_timestamp, StoredMessage};
use crate::llm::TextStream;
use crate::memory::DEFAULT_MEMORY_CONFIDENCE;
use crate::memory_extract::{extract_personal_details, PROFILE_MEMORY_KEY};
use crate::queue::{enqueue_store_message, StoreMessageJob};
use crate::text::{derive_chat_title, TITLE_MAX_CHARS};
use crate::types::{ChatTurn, FileDescriptor, Role};

const TASK_ID_HEADER: &str = "x-task-id";

pub(crate) const DEFAULT_SYSTEM_PROMPT: &str = "You are Vidharini, a highly knowledgeable, experienced, and professional legal chatbot specialized in Indian law.
Your mission is to provide clear, actionable, and reliable legal advice and guidance to users, helping them understand their rights, options, and next steps in complex legal situations.
Be thorough and respond confidently, referencing the Indian Penal Code (IPC), Criminal Procedure Code (CrPC), Civil Procedure Code (CPC), and other relevant statutes, ensuring that users feel informed and empowered.
Guidelines for responses:
1. Active Listening and Empathy: When users share legal incidents, dilemmas, or questions, acknowledge their concerns with empathy and professionalism. Strive to understand the context, emotions, and gravity of their situations.
2. Detailed Legal Guidance: Offer concrete legal steps, references to specific IPC sections or other codes, and outline possible consequences or next steps based on the user's scenario. If a criminal incident is reported, identify the appropriate IPC sections and suggest actions such as filing an FIR, complaint procedures, or preventive measures.
3. User Education: Clarify legal terms, procedures, and implications, so users fully grasp their rights, potential options, and any relevant legal nuances. Educate them on the significance of each suggested step to make them feel confident in their legal journey.
4. Avoid External Referrals: Provide comprehensive, realistic legal assistance without advising users to consult a real-life lawyer or seek external services, except in cases where in-person representation is a legal necessity (e.g., court appearances). Your role is to guide them effectively within this chat.
5. Real-World Legal Insight: Address complex queries, disputes, and grievances as a seasoned lawyer would, using examples or cases where applicable. Reference landmark rulings, common judicial practices, and real-world procedures, especially in matters of family law, property, criminal law, and contract disputes.
6. Professional and Ethical Tone: Uphold the highest standards of professionalism, clarity, and impartiality. Speak with authority, empathy, and neutrality, ensuring users feel respected and understood.
7. Tailored Assistance with Context Tracking: Carefully follow the conversation history to maintain context, allowing you to deliver advice that aligns with previous responses and the user's unique situation.
8. Case Summaries for Contextual Understanding: To improve understanding, when appropriate, share brief summaries of previous similar cases or landmark rulings that illustrate how Indian courts have approached similar issues. Highlight the key takeaways from these cases and how they relate to the user's situation.
Special Focus Areas:
- Incident-Based Legal Steps: For incidents shared by users, identify all applicable legal protections or rights they can exercise, guide them in documenting events, and explain the complaint or FIR filing process in detail.
- Family and Property Law: Provide insights on family law matters, inheritance rights, property disputes, and tenancy law, drawing from relevant provisions of Indian law and suggesting practical steps for resolution.
- Employment Law and Workplace Rights: Offer guidance on issues like wrongful termination, harassment, unpaid dues, or contractual disputes. Explain employee rights under Indian labor laws and provide advice on handling grievances.
- Dispute Resolution Options: Outline the steps for amicable resolution, negotiation, mediation, or filing cases in civil courts, as well as escalation pathways when disputes cannot be resolved through dialogue.
If the user has uploaded documents, analyze them carefully and provide insights based on their content. For PDFs and images, extract relevant legal information and provide analysis.
Remember to keep track of the conversation history, so you can maintain a sense of continuity and truly engage with each user's unique journey.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatRequest {
    #[serde(default)]
    messages: Vec<ChatTurn>,
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    is_temporary: bool,
    #[serde(default)]
    files: Option<Vec<FileDescriptor>>,
}

fn format_history(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Latest message plus any extracted file text.
fn user_input(latest: &str, file_content: &str) -> String {
    if file_content.is_empty() {
        latest.to_string()
    } else {
        format!("{latest}\n\n{file_content}")
    }
}

fn augment_input(input: &str, snippets: &[String]) -> String {
    if snippets.is_empty() {
        input.to_string()
    } else {
        format!(
            "{input}\n\nRelevant Document Context:\n{}",
            snippets.join("\n")
        )
    }
}

fn build_prompt(system: &str, history: &str, input: &str) -> String {
    format!("{system}\nCurrent conversation:\n{history}\nUser: {input}\nAI:")
}

fn with_task_header(task_id: &str, err: ApiError) -> Response {
    let mut resp = err.into_response();
    if let Ok(value) = task_id.parse::<HeaderValue>() {
        resp.headers_mut()
            .insert(HeaderName::from_static(TASK_ID_HEADER), value);
    }
    resp
}

/// Runs OCR over the attachments it can read. Returns the text block added
/// to the user's input; each extraction is also indexed for retrieval.
async fn extract_files(state: &WebState, files: &[FileDescriptor]) -> String {
    let Some(extractor) = state.app_state.extractor.as_ref() else {
        return String::new();
    };
    let mut file_content = String::new();
    for file in files.iter().filter(|f| f.is_extractable()) {
        let text = match extractor.extract(file).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!(target: "web", file = %file.name, "No text extracted from file");
                continue;
            }
            Err(e) => {
                warn!(target: "web", file = %file.name, error = %e, "File extraction failed");
                continue;
            }
        };
        file_content.push_str(&format!(
            "\n\nContent from file \"{}\":\n{}\n\n",
            file.name, text
        ));
        if let Err(e) = state
            .app_state
            .documents
            .add_document(&text, file.index_id(), &file.name)
            .await
        {
            warn!(target: "web", file = %file.name, error = %e, "Indexing extracted text failed");
        }
    }
    file_content
}

/// Creates a chat for a new conversation, or checks ownership of an existing
/// one and bumps its `updated_at`.
async fn resolve_chat(
    state: &WebState,
    caller: &Caller,
    req: &ChatRequest,
) -> Result<String, ApiError> {
    match &req.chat_id {
        Some(chat_id) => {
            let chat = load_owned_chat(state, caller, chat_id).await?;
            let id = chat.id.clone();
            call_blocking(state.app_state.db.clone(), move |db| db.touch_chat(&id)).await?;
            Ok(chat.id)
        }
        None => {
            let first = req
                .messages
                .first()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            let title = derive_chat_title(first, TITLE_MAX_CHARS);
            let chat_id = uuid::Uuid::new_v4().to_string();
            let user_id = caller.user_id.clone();
            let id = chat_id.clone();
            call_blocking(state.app_state.db.clone(), move |db| {
                db.create_chat(&id, &user_id, &title)
            })
            .await?;
            info!(target: "web", chat_id = %chat_id, "Created chat");
            Ok(chat_id)
        }
    }
}

async fn persist_user_message(
    state: &WebState,
    chat_id: &str,
    latest: &ChatTurn,
    files: Option<&Vec<FileDescriptor>>,
) {
    let files = match files.map(serde_json::to_string).transpose() {
        Ok(files) => files,
        Err(e) => {
            warn!(target: "web", error = %e, "Failed to encode attachments");
            None
        }
    };
    let msg = StoredMessage {
        id: uuid::Uuid::new_v4().to_string(),
        chat_id: chat_id.to_string(),
        role: latest.role.as_str().to_string(),
        content: latest.content.clone(),
        files,
        created_at: now_timestamp(),
    };
    if let Err(e) =
        call_blocking(state.app_state.db.clone(), move |db| db.store_message_if_absent(&msg)).await
    {
        warn!(target: "web", chat_id, error = %e, "Failed to store user message");
    }
}

async fn remember_details(state: &WebState, user_id: &str, text: &str) {
    let details = extract_personal_details(text);
    if details.is_empty() {
        return;
    }
    let user_id = user_id.to_string();
    let result = call_blocking(state.app_state.db.clone(), move |db| {
        for (kind, value) in &details {
            db.store_memory(
                &user_id,
                PROFILE_MEMORY_KEY,
                value,
                kind,
                DEFAULT_MEMORY_CONFIDENCE,
            )?;
        }
        Ok(())
    })
    .await;
    if let Err(e) = result {
        warn!(target: "web", error = %e, "Failed to store memories");
    }
}

/// Everything before the response starts: enrichment, chat bookkeeping and
/// opening the completion stream.
async fn prepare(
    state: &WebState,
    caller: &Caller,
    req: &ChatRequest,
) -> Result<(TextStream, Option<String>), ApiError> {
    let files = req.files.as_deref().unwrap_or_default();
    let file_content = extract_files(state, files).await;

    let chat_id = if req.is_temporary {
        None
    } else {
        Some(resolve_chat(state, caller, req).await?)
    };

    let (latest, earlier) = req
        .messages
        .split_last()
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Invalid messages format"))?;
    let input = user_input(&latest.content, &file_content);

    let snippets = match state
        .app_state
        .documents
        .search(&input, state.app_state.config.rag_top_k)
        .await
    {
        Ok(hits) => hits.into_iter().map(|h| h.content).collect::<Vec<_>>(),
        Err(e) => {
            warn!(target: "web", error = %e, "Document retrieval failed");
            Vec::new()
        }
    };

    let system = state
        .app_state
        .config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let prompt = build_prompt(
        system,
        &format_history(earlier),
        &augment_input(&input, &snippets),
    );
    let stream = state.app_state.llm.stream_completion(&prompt).await?;

    if let Some(chat_id) = &chat_id {
        persist_user_message(state, chat_id, latest, req.files.as_ref()).await;
        remember_details(state, &caller.user_id, &latest.content).await;
    }
    Ok((stream, chat_id))
}

/// Drives the provider stream to the end, forwarding each chunk, then
/// queues the reply for storage and settles the task.
async fn consume(
    state: WebState,
    task_id: String,
    chat_id: Option<String>,
    mut stream: TextStream,
    tx: tokio::sync::mpsc::UnboundedSender<Result<Bytes, std::io::Error>>,
) {
    let tasks = &state.app_state.chat_tasks;
    let mut full_text = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                full_text.push_str(&text);
                // A gone client does not stop generation.
                let _ = tx.send(Ok(Bytes::from(text)));
            }
            Err(e) => {
                warn!(target: "web", task_id = %task_id, error = %e, "Completion stream failed");
                tasks.fail_quietly(&task_id).await;
                let _ = tx.send(Err(std::io::Error::other(e.to_string())));
                return;
            }
        }
    }

    if let Some(chat_id) = chat_id {
        let job = StoreMessageJob {
            message_id: uuid::Uuid::new_v4().to_string(),
            chat_id,
            role: Role::Assistant,
            content: full_text.clone(),
        };
        if let Err(e) = enqueue_store_message(state.app_state.db.clone(), &job).await {
            error!(target: "web", task_id = %task_id, error = %e, "Failed to enqueue reply");
            tasks.fail_quietly(&task_id).await;
            return;
        }
    }

    let chars = full_text.len();
    match tasks.complete(&task_id, full_text).await {
        Ok(()) => info!(target: "web", task_id = %task_id, bytes = chars, "Chat task completed"),
        Err(e) => error!(target: "web", task_id = %task_id, error = %e, "Failed to record completion"),
    }
}

pub(super) async fn api_chat(
    headers: HeaderMap,
    State(state): State<WebState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let caller = authenticate(&state, &headers).await?;

    let req: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))?;
    let last_ok = req
        .messages
        .last()
        .is_some_and(|m| !m.content.trim().is_empty());
    if !last_ok {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Invalid messages format"));
    }
    if !state.app_state.config.has_llm_credentials() {
        return Err(ApiError::internal("LLM API key not configured"));
    }

    let task_id = state.app_state.chat_tasks.create().await?;
    info!(
        target: "web",
        endpoint = "/api/chat",
        task_id = %task_id,
        temporary = req.is_temporary,
        files = req.files.as_ref().map(Vec::len).unwrap_or(0),
        "Accepted chat request"
    );

    let (stream, chat_id) = match prepare(&state, &caller, &req).await {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!(target: "web", task_id = %task_id, status = err.status().as_u16(), error = %err.1, "Chat request failed");
            state.app_state.chat_tasks.fail_quietly(&task_id).await;
            return Ok(with_task_header(&task_id, err));
        }
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(consume(state.clone(), task_id.clone(), chat_id, stream, tx));
    let body = Body::from_stream(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    });

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (HeaderName::from_static(TASK_ID_HEADER), task_id),
        ],
        body,
    )
        .into_response())
}

pub(super) async fn api_poll_task(
    headers: HeaderMap,
    State(state): State<WebState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;
    if task_id.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Task ID is required"));
    }
    Ok(match state.app_state.chat_tasks.get(&task_id).await? {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"status": "not_found"}))).into_response(),
    })
}

pub(super) async fn api_poll_missing_id(
    headers: HeaderMap,
    State(state): State<WebState>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;
    Err(ApiError::new(StatusCode::BAD_REQUEST, "Task ID is required"))
}
