use std::time::Duration;

#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 4,
        }
    }
}
