pub mod candle;
pub mod timeframe;

pub use candle::{Candle, Series, SeriesError, Upsert};
pub use timeframe::Timeframe;
