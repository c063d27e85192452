use tokio::sync::RwLock;

/// Supplies the id of the student currently signed in, if any
pub trait SubjectProvider: Send + Sync {
    fn current_subject(&self) -> impl Future<Output = Option<String>> + Send;
}

#[derive(Default)]
/// In-memory session, signed in and out by whatever owns the auth flow
pub struct SessionSubject(RwLock<Option<String>>);

impl SessionSubject {
    pub fn signed_in(id: impl Into<String>) -> Self {
        Self(RwLock::new(Some(id.into())))
    }

    pub async fn sign_in(&self, id: impl Into<String>) {
        *self.0.write().await = Some(id.into());
    }

    pub async fn sign_out(&self) {
        *self.0.write().await = None;
    }
}

impl SubjectProvider for SessionSubject {
    async fn current_subject(&self) -> Option<String> {
        self.0.read().await.clone()
    }
}
