use std::net::IpAddr;
use std::sync::Arc;

use tracing::warn;

use visitlens_core::aggregate::Aggregator;
use visitlens_core::config::Config;
use visitlens_core::report::ReportGenerator;
use visitlens_core::store::EventStore;
use visitlens_duckdb::DuckDbBackend;

/// GeoIP result from a MaxMind lookup.
#[derive(Debug, Clone, Default)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The DuckDB backend. Kept concretely for the health probe.
    pub db: Arc<DuckDbBackend>,

    /// The same backend behind the store trait; everything else goes
    /// through this.
    pub store: Arc<dyn EventStore>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub generator: ReportGenerator,

    /// MaxMind reader, opened once. `None` when the database file is absent;
    /// visitors are then stored without location.
    geoip: Option<maxminddb::Reader<Vec<u8>>>,
}

impl AppState {
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let db = Arc::new(db);
        let store: Arc<dyn EventStore> = db.clone();
        let generator = ReportGenerator::new(Arc::clone(&store), config.aggregation);
        let geoip = open_geoip(&config.geoip_path);
        Self {
            db,
            store,
            config: Arc::new(config),
            generator,
            geoip,
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        self.generator.aggregator()
    }

    /// Look up `ip` in the GeoIP database, if one is loaded.
    pub fn lookup_geo(&self, ip: &str) -> Option<GeoInfo> {
        let reader = self.geoip.as_ref()?;
        let ip_addr: IpAddr = ip.parse().ok()?;
        let record: maxminddb::geoip2::City = reader.lookup(ip_addr).ok()?;

        let country = record
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(|s| s.to_string());
        let city = record
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en"))
            .map(|s| s.to_string());

        Some(GeoInfo { country, city })
    }
}

fn open_geoip(path: &str) -> Option<maxminddb::Reader<Vec<u8>>> {
    if !std::path::Path::new(path).exists() {
        warn!(
            geoip_path = %path,
            "GeoIP database not found. Visitors stored without location. \
             Set VISITLENS_GEOIP_PATH to a GeoLite2-City database."
        );
        return None;
    }
    match maxminddb::Reader::open_readfile(path) {
        Ok(reader) => Some(reader),
        Err(e) => {
            warn!(geoip_path = %path, error = %e, "Failed to open GeoIP database");
            None
        }
    }
}
