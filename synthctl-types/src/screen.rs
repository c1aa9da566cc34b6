use serde::{Deserialize, Serialize};

/// Maximum number of controllers on one display page.
pub const SCREEN_CAPACITY: usize = 4;

/// A titled page of controller symbols, in declaration order.
///
/// Screens are regenerated wholesale after every controller rebuild; consumers
/// key them by `title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    pub title: String,
    pub symbols: Vec<String>,
}

impl Screen {
    pub fn new(title: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            title: title.into(),
            symbols,
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
