//! User-facing side effects the pipeline triggers on failure.

use std::sync::Mutex;

/// Displays a transient message to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Knows the current route and can move the user elsewhere.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn redirect(&self, path: &str);
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::warn!(notice = message, "user notice");
    }
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
    }
}

#[derive(Debug, Default)]
struct Route {
    current: String,
    redirects: Vec<String>,
}

/// In-memory router state.
#[derive(Debug, Default)]
pub struct MemoryNavigator {
    route: Mutex<Route>,
}

impl MemoryNavigator {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            route: Mutex::new(Route {
                current: initial.into(),
                redirects: Vec::new(),
            }),
        }
    }

    /// Every redirect performed so far, oldest first.
    pub fn redirects(&self) -> Vec<String> {
        self.route
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .redirects
            .clone()
    }

    pub fn navigate(&self, path: impl Into<String>) {
        self.route.lock().unwrap_or_else(|e| e.into_inner()).current = path.into();
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.route
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current
            .clone()
    }

    fn redirect(&self, path: &str) {
        let mut route = self.route.lock().unwrap_or_else(|e| e.into_inner());
        route.current = path.to_string();
        route.redirects.push(path.to_string());
    }
}
