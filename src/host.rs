//! Wiring of the bridge subsystems onto one host execution context

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::console::ConsoleBridge;
use crate::console_layer::ConsoleSink;
use crate::directory_watcher::WatcherRegistry;
use crate::error::SetupError;
use crate::main_queue::MainQueue;
use crate::paths::PathTranslator;
use crate::picker::PickerBridge;
use crate::production::{DetachedLauncher, ExitFlag, NotifyFileWatcher};
use crate::scheduler::Scheduler;
use crate::sentinel::SharedDir;
use crate::traits::{FileWatcher, HostControl, PickerObserver, ProcessLauncher};

/// External collaborators of a [`BridgeHost`]
pub struct HostDeps {
    pub file_watcher: Arc<dyn FileWatcher>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub host: Arc<dyn HostControl>,
    pub observer: Option<Arc<dyn PickerObserver>>,
    pub translator: PathTranslator,
}

impl HostDeps {
    /// Real OS implementations. The returned flag is set when the console
    /// asks the host to exit.
    pub fn production(config: &BridgeConfig) -> (Self, ExitFlag) {
        let exit = ExitFlag::new();
        let deps = Self {
            file_watcher: Arc::new(NotifyFileWatcher::new(config.watch_debounce)),
            launcher: Arc::new(DetachedLauncher::new()),
            host: Arc::new(exit.clone()),
            observer: None,
            translator: PathTranslator::from_env(),
        };
        (deps, exit)
    }
}

pub struct BridgeHost {
    shared: SharedDir,
    main_queue: MainQueue,
    scheduler: Arc<Scheduler>,
    registry: WatcherRegistry,
    picker: Option<Arc<PickerBridge>>,
    console: Option<Arc<ConsoleBridge>>,
}

impl BridgeHost {
    /// Prepare the shared directory and bring up the picker and console.
    ///
    /// Only a shared directory that can't be created is an error. A picker
    /// or console that fails to set up is logged and left unavailable.
    pub fn setup(config: &BridgeConfig, deps: HostDeps) -> Result<Self, SetupError> {
        let shared = SharedDir::new(&config.shared_dir);
        shared
            .create()
            .map_err(|e| SetupError::shared_dir(shared.root(), e))?;
        tracing::info!(shared_dir = %shared.root().display(), "Bridge starting up");

        let main_queue = MainQueue::new();
        let registry = WatcherRegistry::new(deps.file_watcher, main_queue.clone());

        let picker = match PickerBridge::setup(
            &shared,
            deps.translator,
            Arc::clone(&deps.launcher),
            deps.observer,
            &registry,
        ) {
            Ok(picker) => Some(picker),
            Err(e) => {
                tracing::error!(error = %e, "File picker unavailable");
                None
            }
        };

        let console = if config.show_console {
            match ConsoleBridge::setup(
                &shared,
                config.console_settings(),
                &registry,
                deps.launcher.as_ref(),
                deps.host,
                main_queue.clone(),
            ) {
                Ok(console) => Some(console),
                Err(e) => {
                    tracing::error!(error = %e, "Console unavailable");
                    None
                }
            }
        } else {
            tracing::info!("Console disabled by configuration");
            None
        };

        Ok(Self {
            shared,
            main_queue,
            scheduler: Arc::new(Scheduler::new()),
            registry,
            picker,
            console,
        })
    }

    /// Route log events into the console, if one is up
    pub fn attach_console(&self, sink: &ConsoleSink) -> bool {
        match &self.console {
            Some(console) => sink.attach(console.appender()),
            None => false,
        }
    }

    /// One frame of the host loop: run marshaled callbacks, then timers
    pub fn tick(&self, dt: Duration) {
        self.main_queue.drain();
        self.scheduler.update(dt);
    }

    pub fn shutdown(&self) {
        tracing::info!("Bridge shutting down");
        if let Some(console) = &self.console {
            console.shutdown();
        }
        self.registry.clear();
    }

    pub fn shared_dir(&self) -> &Path {
        self.shared.root()
    }

    pub fn shared(&self) -> &SharedDir {
        &self.shared
    }

    pub fn main_queue(&self) -> &MainQueue {
        &self.main_queue
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    pub fn picker(&self) -> Option<&Arc<PickerBridge>> {
        self.picker.as_ref()
    }

    pub fn console(&self) -> Option<&Arc<ConsoleBridge>> {
        self.console.as_ref()
    }
}
