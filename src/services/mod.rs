pub mod board_service;
pub mod fallback;
pub mod price_service;
pub mod writer;
