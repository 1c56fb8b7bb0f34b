// 公开导出的模块，供外部使用
pub mod models;
pub mod errors;
pub mod config;
pub mod parsers;
pub mod scrapers;
pub mod services;

#[doc(hidden)]
pub mod util;

// 重新导出常用类型，方便使用
pub use config::Config;
pub use errors::{HarvestError, Result};
pub use models::record::{DateRange, Message, PriceRow, Reply};
pub use scrapers::base::Fetcher;
pub use scrapers::http::HttpFetcher;
pub use services::board_service::BoardService;
pub use services::fallback::{FallbackState, SymbolReport};
pub use services::price_service::PriceService;
