pub mod identity;
pub mod run;
