pub(crate) const SETTINGS_FILE_PATH: &str = "settings.json";
pub(crate) const SETTINGS_PATH_ENV: &str = "MYTRACKS_PKI_SETTINGS";
pub const SECRET_KEY_NAME: &str = "MYTRACKS_SECRET_KEY";
pub const PKI_VERSION: &str = "v0.3.0";

/// RSA modulus sizes a caller may request.
pub const ALLOWED_KEY_SIZES: [u32; 3] = [2048, 3072, 4096];
pub const DEFAULT_KEY_SIZE: u32 = 4096;

/// Validity presets offered to callers, in days.
pub const VALIDITY_PRESETS: [u32; 5] = [365, 730, 1095, 1460, 1825];
pub const DEFAULT_VALIDITY_DAYS: u32 = 1825;
pub const MIN_VALIDITY_DAYS: i64 = 1;
pub const MAX_VALIDITY_DAYS: i64 = 36500;

pub const DEFAULT_CA_COMMON_NAME: &str = "My Tracks CA";
pub const DEFAULT_ORGANIZATION: &str = "My Tracks";

/// Serial numbers are drawn from this many random bits.
pub(crate) const SERIAL_NUMBER_BITS: i32 = 160;
pub(crate) const RSA_PUBLIC_EXPONENT: u32 = 65537;

pub const PEM_CONTENT_TYPE: &str = "application/x-pem-file";
