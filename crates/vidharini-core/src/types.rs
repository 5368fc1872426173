use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One turn of the conversation as sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Attachment reference. Files are hosted elsewhere and arrive as URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl FileDescriptor {
    pub fn is_extractable(&self) -> bool {
        self.mime_type == "application/pdf" || self.mime_type.starts_with("image/")
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn index_id(&self) -> &str {
        self.file_id.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

/// State of an asynchronous task as kept on the status board.
///
/// Only `Completed` carries a result. On the wire this is
/// `{"status": "...", "result": ...}` with `result` null for the other states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "TaskRecordWire", try_from = "TaskRecordWire")]
pub enum TaskRecord {
    Processing,
    Completed(String),
    Failed,
}

impl TaskRecord {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskRecord::Processing => TaskStatus::Processing,
            TaskRecord::Completed(_) => TaskStatus::Completed,
            TaskRecord::Failed => TaskStatus::Failed,
        }
    }

    pub fn result(&self) -> Option<&str> {
        match self {
            TaskRecord::Completed(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskRecord::Processing)
    }
}

#[derive(Serialize, Deserialize)]
struct TaskRecordWire {
    status: TaskStatus,
    #[serde(default)]
    result: Option<String>,
}

impl From<TaskRecord> for TaskRecordWire {
    fn from(record: TaskRecord) -> Self {
        let status = record.status();
        let result = match record {
            TaskRecord::Completed(text) => Some(text),
            _ => None,
        };
        TaskRecordWire { status, result }
    }
}

impl TryFrom<TaskRecordWire> for TaskRecord {
    type Error = String;

    fn try_from(wire: TaskRecordWire) -> Result<Self, Self::Error> {
        match (wire.status, wire.result) {
            (TaskStatus::Processing, _) => Ok(TaskRecord::Processing),
            (TaskStatus::Failed, _) => Ok(TaskRecord::Failed),
            (TaskStatus::Completed, Some(text)) => Ok(TaskRecord::Completed(text)),
            (TaskStatus::Completed, None) => Err("completed task without result".into()),
        }
    }
}
