/// Configuration system
///
/// - `schemas`: config structures with embedded defaults
/// - `utils`: loading and global access
/// - `macros`: the `config_struct!` macro
#[macro_use]
pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::{
    BrokerConfig, ClientConfig, Config, LoggingConfig, RegistryConfig, StaticServiceConfig,
};
pub use utils::{
    get_config_clone, load_config_from_path, parse_config, read_config_file, with_config,
    CONFIG_FILE_PATH,
};
