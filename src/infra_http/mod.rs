mod jwks_fetcher_http;

pub use jwks_fetcher_http::*;
