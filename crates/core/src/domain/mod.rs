pub mod constraints;
pub mod instrument;
pub mod portfolio;
pub mod quote;
pub mod score;
