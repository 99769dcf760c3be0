pub mod url_validation;
pub use url_validation::{
    UrlValidationError, media_stream_url, validate_callback_host, validate_service_url,
};
