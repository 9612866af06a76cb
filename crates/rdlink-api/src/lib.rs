pub mod realdebrid;
pub mod traits;
