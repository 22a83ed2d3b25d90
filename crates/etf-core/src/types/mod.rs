//! 공통 타입 정의.

pub mod symbol;
pub mod timeframe;

pub use symbol::*;
pub use timeframe::*;
