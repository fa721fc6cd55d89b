pub mod config_cmd;
pub mod history;
pub mod init;
pub mod knowledge;
pub mod serve;
