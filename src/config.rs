use std::time::Duration;

use crate::models::NodeRole;

/// Configuration for [`ConfigService`](crate::ConfigService).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) local_url: String,
    pub(crate) role: NodeRole,
    pub(crate) master_url: Option<String>,
    pub(crate) replace_master: bool,
    pub(crate) stale_threshold: Duration,
    pub(crate) evaluator_pool_capacity: usize,
    pub(crate) telemetry_queue_capacity: usize,
    pub(crate) template_depth_limit: usize,
    pub(crate) sync_interval: Duration,
    pub(crate) sync_jitter: Duration,
    pub(crate) peer_timeout: Duration,
}

impl ServerConfig {
    /// Slaves refuse client reads when they haven't heard from the master for this long.
    pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_EVALUATOR_POOL_CAPACITY: usize = 64;
    pub const DEFAULT_TELEMETRY_QUEUE_CAPACITY: usize = 128;
    pub const DEFAULT_TEMPLATE_DEPTH_LIMIT: usize = 8;
    pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_SYNC_JITTER: Duration = Duration::from_secs(3);
    pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

    /// Configuration for the master node reachable at `local_url`.
    ///
    /// ```
    /// # use confsync::ServerConfig;
    /// ServerConfig::master("http://10.0.0.1:8080");
    /// ```
    pub fn master(local_url: impl Into<String>) -> ServerConfig {
        ServerConfig::with_role(local_url.into(), NodeRole::Master, None)
    }

    /// Configuration for a slave node that replicates from `master_url`.
    ///
    /// ```
    /// # use confsync::ServerConfig;
    /// ServerConfig::slave("http://10.0.0.2:8080", "http://10.0.0.1:8080");
    /// ```
    pub fn slave(local_url: impl Into<String>, master_url: impl Into<String>) -> ServerConfig {
        ServerConfig::with_role(local_url.into(), NodeRole::Slave, Some(master_url.into()))
    }

    fn with_role(local_url: String, role: NodeRole, master_url: Option<String>) -> ServerConfig {
        ServerConfig {
            local_url,
            role,
            master_url,
            replace_master: false,
            stale_threshold: ServerConfig::DEFAULT_STALE_THRESHOLD,
            evaluator_pool_capacity: ServerConfig::DEFAULT_EVALUATOR_POOL_CAPACITY,
            telemetry_queue_capacity: ServerConfig::DEFAULT_TELEMETRY_QUEUE_CAPACITY,
            template_depth_limit: ServerConfig::DEFAULT_TEMPLATE_DEPTH_LIMIT,
            sync_interval: ServerConfig::DEFAULT_SYNC_INTERVAL,
            sync_jitter: ServerConfig::DEFAULT_SYNC_JITTER,
            peer_timeout: ServerConfig::DEFAULT_PEER_TIMEOUT,
        }
    }

    /// Remove a different registered master on startup instead of refusing to start.
    ///
    /// There is no election: enabling this on two nodes at once leaves the cluster with two
    /// masters.
    pub fn replace_master(&mut self, replace: bool) -> &mut Self {
        self.replace_master = replace;
        self
    }

    pub fn stale_threshold(&mut self, threshold: Duration) -> &mut Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn evaluator_pool_capacity(&mut self, capacity: usize) -> &mut Self {
        self.evaluator_pool_capacity = capacity;
        self
    }

    /// Telemetry events arriving while the queue is full are dropped.
    pub fn telemetry_queue_capacity(&mut self, capacity: usize) -> &mut Self {
        self.telemetry_queue_capacity = capacity;
        self
    }

    pub fn template_depth_limit(&mut self, limit: usize) -> &mut Self {
        self.template_depth_limit = limit;
        self
    }

    /// Interval between version checks a slave makes against the master.
    ///
    /// ```
    /// # use std::time::Duration;
    /// # use confsync::ServerConfig;
    /// let mut config = ServerConfig::slave("http://10.0.0.2:8080", "http://10.0.0.1:8080");
    /// config.sync_interval(Duration::from_secs(10)).sync_jitter(Duration::from_secs(1));
    /// ```
    pub fn sync_interval(&mut self, interval: Duration) -> &mut Self {
        self.sync_interval = interval;
        self
    }

    pub fn sync_jitter(&mut self, jitter: Duration) -> &mut Self {
        self.sync_jitter = jitter;
        self
    }

    /// Timeout for requests to peer nodes.
    pub fn peer_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn local_url(&self) -> &str {
        &self.local_url
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }
}
