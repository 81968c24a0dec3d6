pub mod dialogs;
pub mod log_table;
