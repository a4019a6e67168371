use super::PortMap;
use crate::config::{Binary, Service};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Hint variable pointing every service at the runtime data dir.
pub const DATA_DIR_VAR: &str = "BUNDLE_DATA_DIR";
/// Hint variable pointing every service at the bundle root.
pub const BUNDLE_ROOT_VAR: &str = "BUNDLE_ROOT";

static TEMPLATE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_template_regex() -> &'static Regex {
    TEMPLATE_REGEX
        .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex pattern is valid"))
}

/// Expands `${token}` templates in env values, args, cwd and migration
/// commands.
///
/// - `${data}` is the data dir
/// - `${bundle}` is the bundle root
/// - `${svc.port}` is the port allocated for `svc`'s request named `port`
///
/// Anything else is left verbatim.
pub struct EnvRenderer<'a> {
    data_dir: &'a Path,
    bundle_root: &'a Path,
    ports: &'a PortMap,
}

impl<'a> EnvRenderer<'a> {
    pub fn new(data_dir: &'a Path, bundle_root: &'a Path, ports: &'a PortMap) -> Self {
        Self {
            data_dir,
            bundle_root,
            ports,
        }
    }

    pub fn render_value(&self, value: &str) -> String {
        get_template_regex()
            .replace_all(value, |cap: &Captures| {
                self.lookup(cap[1].trim())
                    .unwrap_or_else(|| cap[0].to_string())
            })
            .into_owned()
    }

    pub fn render_values(&self, values: &[String]) -> Vec<String> {
        values.iter().map(|v| self.render_value(v)).collect()
    }

    fn lookup(&self, token: &str) -> Option<String> {
        match token {
            "data" => Some(self.data_dir.to_string_lossy().into_owned()),
            "bundle" => Some(self.bundle_root.to_string_lossy().into_owned()),
            _ => {
                let (service, port_name) = token.rsplit_once('.')?;
                self.ports
                    .get(service)?
                    .get(port_name)
                    .map(|port| port.to_string())
            }
        }
    }

    /// Full environment for a service process, inheriting this process's
    /// environment.
    pub fn render_env_map(&self, service: &Service, binary: &Binary) -> BTreeMap<String, String> {
        self.render_env_map_from(std::env::vars(), service, binary)
    }

    /// Merge order, later wins: `inherited`, the two hint variables,
    /// service overrides, binary overrides. Only overrides are expanded.
    pub fn render_env_map_from(
        &self,
        inherited: impl IntoIterator<Item = (String, String)>,
        service: &Service,
        binary: &Binary,
    ) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = inherited.into_iter().collect();

        env.insert(
            DATA_DIR_VAR.to_string(),
            self.data_dir.to_string_lossy().into_owned(),
        );
        env.insert(
            BUNDLE_ROOT_VAR.to_string(),
            self.bundle_root.to_string_lossy().into_owned(),
        );

        for (key, value) in service.env.iter().chain(binary.env.iter()) {
            env.insert(key.clone(), self.render_value(value));
        }
        env
    }

    /// Working directory for a binary, defaulting to the bundle root.
    pub fn render_cwd(&self, binary: &Binary) -> PathBuf {
        match &binary.cwd {
            Some(cwd) => {
                let rendered = PathBuf::from(self.render_value(cwd));
                if rendered.is_absolute() {
                    rendered
                } else {
                    self.bundle_root.join(rendered)
                }
            }
            None => self.bundle_root.to_path_buf(),
        }
    }
}
