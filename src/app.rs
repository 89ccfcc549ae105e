use crate::call::{
    config_store::{ConfigStore, FileConfigStore, MemoryConfigStore},
    controller::{IvrController, IvrControllerBuilder},
    directive::{CallbackUrls, DirectiveCompiler},
    dispatch::DispatchManagerBuilder,
    ivr_config::IvrConfig,
};
use crate::config::{Config, ConfigStoreConfig};
use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub controller: IvrController,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub controller: Option<IvrController>,
    pub config_store: Option<Arc<dyn ConfigStore>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            controller: None,
            config_store: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_controller(mut self, controller: IvrController) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub async fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let token = CancellationToken::new();

        let controller = match self.controller {
            Some(controller) => controller,
            None => {
                let default_config = match config.default_ivr {
                    Some(ref path) => {
                        info!(path = %path, "loading default IVR config");
                        IvrConfig::from_file(path)?
                    }
                    None => IvrConfig::default(),
                };
                let config_store = self
                    .config_store
                    .unwrap_or_else(|| create_config_store(&config.config_store));

                let mut dispatch_manager = DispatchManagerBuilder::new()
                    .with_cancel_token(token.child_token())
                    .with_config(config.dispatch.clone())
                    .build();
                let dispatcher = Arc::new(dispatch_manager.sender.clone());
                tokio::spawn(async move {
                    dispatch_manager.serve().await;
                });

                IvrControllerBuilder::new()
                    .with_config_store(config_store)
                    .with_dispatcher(dispatcher)
                    .with_compiler(DirectiveCompiler::new(CallbackUrls::from_base(
                        &config.public_url,
                    )))
                    .with_default_config(default_config)
                    .build()?
            }
        };

        Ok(Arc::new(AppStateInner {
            config,
            controller,
            token,
        }))
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn create_config_store(config: &ConfigStoreConfig) -> Arc<dyn ConfigStore> {
    match config {
        ConfigStoreConfig::Memory => {
            warn!("memory config store has no tenants, every call uses the default IVR");
            Arc::new(MemoryConfigStore::new())
        }
        ConfigStoreConfig::File { root } => {
            info!(root = %root, "loading tenant IVR configs from disk");
            Arc::new(FileConfigStore::new(root))
        }
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();

    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("listening on {}", addr);

    let http_task = axum::serve(listener, app);

    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    return Err(anyhow::anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    token.cancel();
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    crate::handler::router().with_state(state).layer(cors)
}
