pub mod dialog;
pub mod error;
pub mod native_v1;
pub mod pasteboard;
pub mod protocol;
pub mod url_builder;
pub mod web_v1;
pub mod web_v2;
