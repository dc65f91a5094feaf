pub mod run;
pub mod send;
