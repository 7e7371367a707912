use std::sync::Arc;
use std::time::Instant;

use crate::quote::QuoteProvider;

#[derive(Clone)]
pub struct AppState {
    /// Upstream quote/build service
    pub quotes: Arc<dyn QuoteProvider>,
    /// Address receiving payments, shown on /health
    pub pay_to: String,
    /// "METHOD PATH" of every priced route
    pub priced_routes: Arc<Vec<String>>,
    /// When the server was started (for uptime tracking)
    pub started_at: Instant,
}

impl AppState {
    pub fn new(quotes: Arc<dyn QuoteProvider>, pay_to: impl Into<String>, priced_routes: Vec<String>) -> Self {
        Self {
            quotes,
            pay_to: pay_to.into(),
            priced_routes: Arc::new(priced_routes),
            started_at: Instant::now(),
        }
    }
}
