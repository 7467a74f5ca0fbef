pub mod bloom_filter;
pub mod branch_opt_util;
pub mod database;
pub mod directory;
pub mod error;
pub mod hint;
pub mod lwe;
pub mod matrix;
pub mod messages;
pub mod oprf;
pub mod params;
pub mod serialization;
pub mod transaction;
