pub mod candle_buffer;
pub mod gateway;
pub mod sentiment;

// Re-export the Candle struct for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle_buffer::{Candle, CandleBuffer, CandleKey};
pub use gateway::{MarketDataGateway, Ticker};
