// Domain-layer modules and shared errors/models
pub mod analytics {
    pub use crate::analytics::*;
}

pub mod periods {
    pub use crate::periods::*;
}

pub mod reports {
    pub use crate::report_formatter::*;
}

pub mod exports {
    pub use crate::exports::*;
}

pub mod orchestrator {
    pub use crate::orchestrator::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
