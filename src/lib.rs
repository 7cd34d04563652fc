pub mod config;
pub mod detector;
pub mod error;
pub mod feed;
pub mod notifier;
pub mod poll;
pub mod reporter;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_http;
