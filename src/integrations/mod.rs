//! External service integrations.

pub mod kommo {
    pub use crate::kommo_client::*;
}

pub mod telegram {
    pub use crate::telegram::*;
}

pub mod telegram_models {
    pub use crate::telegram_models::*;
}
