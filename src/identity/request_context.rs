use uuid::Uuid;

/// Per-call context supplied by the embedder; used for log correlation only.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub request_id: Option<String>,
    pub platform_ref: Option<String>,
}

impl CallerContext {
    /// Context with a fresh random request id.
    pub fn with_new_request_id() -> Self {
        Self { request_id: Some(Uuid::new_v4().to_string()), platform_ref: None }
    }

    pub(crate) fn corr(&self) -> &str { self.request_id.as_deref().unwrap_or("-") }
}
