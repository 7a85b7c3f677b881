use lazy_static::lazy_static;

use prelude::*;

pub mod anonymize;
pub mod dao;
pub mod drive;
pub mod entities;
pub mod error;
pub mod loader;
pub mod media;
pub mod merge;
pub mod pipeline;
pub mod utils;

#[cfg(test)]
pub mod test_utils;

pub mod prelude {
    pub use std::collections::{HashMap, HashSet};

    pub use crate::*;
    pub use crate::{err, require};
    pub use crate::anonymize::*;
    pub use crate::entities::*;
    pub use crate::error::*;
    #[cfg(test)]
    pub use crate::test_utils::*;
    pub use crate::utils::*;
}

//
// External transport seam
//

pub trait HttpClient: Send + Sync {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct ReqwestHttpClient;

impl HttpClient for ReqwestHttpClient {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        lazy_static! {
            static ref CLIENT: reqwest::blocking::Client = reqwest::blocking::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("Failed to build the HTTP client");
        }
        Ok(CLIENT.get(url).send()?.error_for_status()?.bytes()?.to_vec())
    }
}
