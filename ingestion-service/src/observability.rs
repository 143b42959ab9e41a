use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Logs go to stderr so that command output
/// on stdout stays clean; `LOG_FORMAT=json` switches to one JSON object per
/// line.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("octo_usage_ingest=info,octo_usage=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
