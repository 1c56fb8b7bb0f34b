pub mod record;
pub mod fetch;
