use std::sync::Arc;

use tokio::sync::Mutex;

use crate::auth::backend::AuthBackend;
use crate::auth::session::SessionStore;
use crate::login::flow::LoginFlowStore;
use crate::login::locale::Locale;

pub struct AppState {
    pub backend: Arc<dyn AuthBackend>,
    pub flows: Mutex<LoginFlowStore>,
    pub sessions: Mutex<SessionStore>,
    pub default_locale: Locale,
}
