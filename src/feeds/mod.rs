pub mod binance;
pub mod cache;
