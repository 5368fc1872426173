use super::*;
use sha2::{Digest, Sha256};

use crate::db::{ChatRecord, Database};

pub(super) fn auth_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?.trim();
    let mut parts = raw.splitn(2, char::is_whitespace);
    let scheme = parts.next()?.trim();
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

pub(super) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The authenticated user behind a request.
#[derive(Clone, Debug)]
pub(super) struct Caller {
    pub(super) user_id: String,
}

/// Resolves the bearer key to its user. 401 when the key is missing or
/// unknown, 404 when it still resolves but the user is gone.
pub(super) async fn authenticate(state: &WebState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let Some(token) = auth_token_from_headers(headers) else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized"));
    };
    let key_hash = sha256_hex(&token);
    let owner = call_blocking(state.app_state.db.clone(), move |db| {
        db.validate_api_key_hash(&key_hash)
    })
    .await?;
    let Some(owner) = owner else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized"));
    };

    let user_id = owner.user_id.clone();
    let user = call_blocking(state.app_state.db.clone(), move |db| db.get_user(&user_id)).await?;
    if user.is_none() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "User not found"));
    }
    Ok(Caller {
        user_id: owner.user_id,
    })
}

/// Loads `chat_id` and checks it belongs to `caller`.
pub(super) async fn load_owned_chat(
    state: &WebState,
    caller: &Caller,
    chat_id: &str,
) -> Result<ChatRecord, ApiError> {
    let id = chat_id.to_string();
    let chat = call_blocking(state.app_state.db.clone(), move |db| db.get_chat(&id))
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Chat not found"))?;
    if chat.user_id != caller.user_id {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Forbidden"));
    }
    Ok(chat)
}

#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub key_id: i64,
    /// Shown once; only its hash is stored.
    pub key: String,
    pub prefix: String,
}

/// Creates a bearer key for `user_id`.
pub async fn issue_api_key(
    db: Arc<Database>,
    user_id: &str,
    label: &str,
) -> Result<IssuedKey, VidharaError> {
    let key = format!("vk_{}", uuid::Uuid::new_v4().simple());
    let prefix = key.chars().take(10).collect::<String>();
    let key_hash = sha256_hex(&key);
    let user_id = user_id.to_string();
    let label = label.to_string();
    let prefix_for_db = prefix.clone();
    let key_id = call_blocking(db, move |db| {
        db.create_api_key(&user_id, &label, &key_hash, &prefix_for_db)
    })
    .await?;
    Ok(IssuedKey {
        key_id,
        key,
        prefix,
    })
}
