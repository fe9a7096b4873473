pub mod cli;
pub mod pordo;
