/// Default production host for the Data Connect API.
pub const DEFAULT_DATA_CONNECT_HOST: &str = "firebasedataconnect.googleapis.com";

/// Environment variable consulted for emulator routing, e.g. `http://127.0.0.1:9399`.
pub const EMULATOR_HOST_ENV_VAR: &str = "FIREBASE_DATA_CONNECT_EMULATOR_HOST";

pub const DEFAULT_EMULATOR_HOST: &str = "127.0.0.1";
pub const DEFAULT_EMULATOR_PORT: u16 = 9399;

pub const API_VERSION: &str = "v1";

pub const HEADER_REQUEST_PARAMS: &str = "x-goog-request-params";
pub const HEADER_API_CLIENT: &str = "x-goog-api-client";
pub const HEADER_GMPID: &str = "x-firebase-gmpid";
pub const HEADER_AUTH_TOKEN: &str = "x-firebase-auth-token";

/// Length of the random request id attached to every execution attempt.
pub const REQUEST_ID_LENGTH: usize = 20;
