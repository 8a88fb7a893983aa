use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Deployment flavour. Selects the log format (pretty vs JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn from_env() -> Self {
        Self::parse(&env_string("ENVIRONMENT", "development"))
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Read a string variable, falling back to `default` when unset or not unicode.
pub fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse a variable. Unset or unparsable values yield `default`.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a millisecond count as a [`Duration`].
pub fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_recognises_production_aliases() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("PROD"), Environment::Production);
        assert_eq!(Environment::parse(" Production "), Environment::Production);
    }

    #[test]
    fn parse_defaults_to_development() {
        assert_eq!(Environment::parse("staging"), Environment::Development);
        assert_eq!(Environment::parse(""), Environment::Development);
    }

    #[test]
    #[serial]
    fn env_or_falls_back_on_garbage() {
        unsafe { env::set_var("COMMON_TEST_NUMBER", "not-a-number") };
        assert_eq!(env_or("COMMON_TEST_NUMBER", 42u32), 42);

        unsafe { env::set_var("COMMON_TEST_NUMBER", " 7 ") };
        assert_eq!(env_or("COMMON_TEST_NUMBER", 42u32), 7);

        unsafe { env::remove_var("COMMON_TEST_NUMBER") };
        assert_eq!(env_or("COMMON_TEST_NUMBER", 42u32), 42);
    }

    #[test]
    #[serial]
    fn env_duration_reads_milliseconds() {
        unsafe { env::set_var("COMMON_TEST_DELAY_MS", "1500") };
        assert_eq!(
            env_duration_ms("COMMON_TEST_DELAY_MS", 10),
            Duration::from_millis(1500)
        );
        unsafe { env::remove_var("COMMON_TEST_DELAY_MS") };
        assert_eq!(
            env_duration_ms("COMMON_TEST_DELAY_MS", 10),
            Duration::from_millis(10)
        );
    }

    #[test]
    #[serial]
    fn environment_from_env() {
        unsafe { env::set_var("ENVIRONMENT", "prod") };
        assert_eq!(Environment::from_env(), Environment::Production);
        unsafe { env::remove_var("ENVIRONMENT") };
        assert_eq!(Environment::from_env(), Environment::Development);
    }
}
