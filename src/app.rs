use crate::{
    config::Config,
    detector::{Detector, OrtDetector},
    server::HttpServer,
};
use std::{error::Error, sync::Arc};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    tracing::info!("Loading model from {:?}", config.model.get_weights_path());

    // A model that fails to load does not prevent startup: the server runs
    // in degraded mode and every /detect answers with the model-not-loaded
    // error until the process is restarted with valid weights.
    let detector: Option<Arc<dyn Detector>> = match OrtDetector::new(&config.model) {
        Ok(detector) => {
            tracing::info!("Model loaded successfully");
            Some(Arc::new(detector))
        }
        Err(e) => {
            tracing::error!("Failed to load model, serving degraded: {}", e);
            None
        }
    };

    let server = HttpServer::new(detector, &config).await?;
    server.run().await?;

    Ok(())
}
