pub mod cache;
pub mod model;
pub mod repository;
pub mod repository_sqlx;
#[allow(clippy::module_inception)]
pub mod store;

pub use cache::{MemoryPriceCache, PriceCache};
pub use model::{PricePoint, PriceRecord};
pub use repository::PriceRepository;
pub use repository_sqlx::SqlxPriceRepository;
pub use store::{PriceStore, WriteOutcome};
