use anyhow::Result;

/// Install the metrics exporter selected by cargo features. Without either
/// exporter feature the `metrics` macros stay no-ops.
pub fn init_exporter() -> Result<()> {
    #[cfg(feature = "prometheus-exporter")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        PrometheusBuilder::new().install()?;
    }

    #[cfg(feature = "datadog-exporter")]
    {
        use metrics_exporter_dogstatsd::DogStatsDBuilder;
        DogStatsDBuilder::default().install()?;
    }

    tracing::debug!("metrics exporter initialised");
    Ok(())
}
