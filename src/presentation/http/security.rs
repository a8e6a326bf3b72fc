use poem::{Error as PoemError, Result as PoemResult, http::StatusCode};
use poem_openapi::SecurityScheme;
use poem_openapi::auth::Bearer;

#[derive(SecurityScheme)]
#[oai(ty = "bearer")]
pub struct ApiKeyAuth(pub Bearer);

impl ApiKeyAuth {
    pub fn authorize(&self, api_key: &str) -> PoemResult<()> {
        if !api_key.is_empty() && constant_time_eq(self.0.token.as_bytes(), api_key.as_bytes()) {
            Ok(())
        } else {
            Err(PoemError::from_string("invalid API key", StatusCode::UNAUTHORIZED))
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
