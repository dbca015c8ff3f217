pub mod helper;
pub mod test_pki;
