use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared password for every college. Students and staff authenticate
/// against the college's own identity system; this only guards the wire.
#[derive(Debug)]
pub struct SuiteDrawAuthSource {
    password: String,
}

impl SuiteDrawAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SuiteDrawAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
