use std::{net::IpAddr, sync::LazyLock};

use serde::{Deserialize, Serialize};

pub(crate) static CONFIG_BIN: LazyLock<DynAppConfig> = LazyLock::new(get_config);

#[derive(Clone, Deserialize, Serialize, Debug)]
pub(crate) struct DynAppConfig {
    pub(crate) bind_ip: IpAddr,
    pub(crate) listen_port: u16,
    pub(crate) debug: DebugConfig,
}

impl Default for DynAppConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::from([0, 0, 0, 0]),
            listen_port: 8181,
            debug: DebugConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub(crate) struct DebugConfig {
    pub(crate) extended_logs: bool,
    /// Run the serve command unless another command is specified.
    pub(crate) auto_serve: bool,
}

fn get_config() -> DynAppConfig {
    let defaults = figment::providers::Serialized::defaults(DynAppConfig::default());

    #[cfg(not(test))]
    let prefix = "CLOUDKIT_SERVER__";
    #[cfg(test)]
    let prefix = "CLOUDKIT_SERVER_TEST__";

    let config = figment::Figment::from(defaults)
        .merge(figment::providers::Env::prefixed(prefix).split("__"));

    match config.extract::<DynAppConfig>() {
        Ok(c) => c,
        Err(e) => panic!("Failed to extract cloudkit-server config: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_port_env_var_overrides_default() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CLOUDKIT_SERVER_TEST__LISTEN_PORT", "9090");
            let config = get_config();
            assert_eq!(config.listen_port, 9090);
            Ok(())
        });
    }

    #[test]
    fn auto_serve_defaults_to_false() {
        figment::Jail::expect_with(|_jail| {
            let config = get_config();
            assert!(!config.debug.auto_serve);
            Ok(())
        });
    }
}
