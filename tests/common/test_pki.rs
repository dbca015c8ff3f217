use std::ops::Deref;
use anyhow::Result;
use mytracks_pki::{CaView, ClientCertView, Pki, PkiSecret, ServerCertView, Settings, UserView};
use crate::common::constants::*;

pub(crate) struct TestPki(Pki);

impl Deref for TestPki {
    type Target = Pki;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TestPki {
    pub(crate) fn new() -> Self {
        let secret = PkiSecret::new(TEST_SECRET).unwrap();
        TestPki(Pki::new(Settings::in_memory(), secret).unwrap())
    }

    pub(crate) async fn new_with_ca() -> Self {
        let pki = Self::new();
        pki.create_test_ca().await.unwrap();
        pki
    }

    pub(crate) async fn new_with_server_cert() -> Self {
        let pki = Self::new_with_ca().await;
        pki.issue_test_server_cert().await.unwrap();
        pki
    }

    pub(crate) async fn create_test_ca(&self) -> Result<CaView> {
        Ok(self.create_ca(TEST_CA_NAME, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?)
    }

    pub(crate) async fn issue_test_server_cert(&self) -> Result<ServerCertView> {
        Ok(self
            .issue_server_cert(TEST_SERVER_NAME, &test_sans(), TEST_VALIDITY_DAYS, TEST_KEY_SIZE)
            .await?)
    }

    pub(crate) async fn create_user_with_cert(&self, username: &str) -> Result<(UserView, ClientCertView)> {
        let user = self.register_user(username).await?;
        let cert = self.issue_client_cert(user.id, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?;
        Ok((user, cert))
    }
}
