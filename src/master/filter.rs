use std::fmt;

/// Filter string for master server queries, rendered as `\key\value` pairs.
///
/// Setting a key twice replaces its value, except for the logical operators
/// (`nand`, `nor`) and `napp` which may appear several times.
///
/// ```
/// use gamequery::master::ServerFilter;
///
/// let filter = ServerFilter::new().app_id(440).dedicated(true).map_name("ctf_2fort");
/// assert_eq!(filter.to_string(), "\\appid\\440\\dedicated\\1\\map\\ctf_2fort");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFilter {
    entries: Vec<(String, Option<String>)>,
    all_servers: bool,
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_owned()
}

impl ServerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every other condition; the master returns everything it has.
    pub fn all_servers(mut self) -> Self {
        self.all_servers = true;
        self
    }

    fn set(mut self, key: &str, value: impl Into<Option<String>>) -> Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_owned(), value)),
        }
        self
    }

    fn push(mut self, key: &str, value: Option<String>) -> Self {
        self.entries.push((key.to_owned(), value));
        self
    }

    pub fn is_spec_proxy(self, value: bool) -> Self {
        self.set("proxy", flag(value))
    }

    pub fn is_full(self, value: bool) -> Self {
        self.set("full", flag(value))
    }

    pub fn is_empty(self, value: bool) -> Self {
        self.set("empty", flag(value))
    }

    pub fn is_password_protected(self, value: bool) -> Self {
        self.set("password", flag(value))
    }

    pub fn is_linux_server(self, value: bool) -> Self {
        self.set("linux", flag(value))
    }

    pub fn map_name(self, map: &str) -> Self {
        self.set("map", map.to_owned())
    }

    pub fn gamedir(self, dir: &str) -> Self {
        self.set("gamedir", dir.to_owned())
    }

    pub fn is_secure(self, value: bool) -> Self {
        self.set("secure", flag(value))
    }

    pub fn dedicated(self, value: bool) -> Self {
        self.set("dedicated", flag(value))
    }

    pub fn has_no_players(self, value: bool) -> Self {
        self.set("noplayers", flag(value))
    }

    pub fn gametypes(self, tags: &[&str]) -> Self {
        self.set("gametype", tags.join(","))
    }

    pub fn gamedata(self, tags: &[&str]) -> Self {
        self.set("gamedata", tags.join(","))
    }

    pub fn gamedata_or(self, tags: &[&str]) -> Self {
        self.set("gamedataor", tags.join(","))
    }

    pub fn with_host_name(self, wildcard: &str) -> Self {
        self.set("name_match", wildcard.to_owned())
    }

    pub fn has_version(self, version: &str) -> Self {
        self.set("version_match", version.to_owned())
    }

    pub fn only_one_server_per_unique_ip(self, value: bool) -> Self {
        self.set("collapse_addr_hash", flag(value))
    }

    pub fn has_server_ip(self, address: &str) -> Self {
        self.set("gameaddr", address.to_owned())
    }

    pub fn is_whitelisted(self, value: bool) -> Self {
        self.set("white", flag(value))
    }

    /// Ignored for an app id of 0.
    pub fn app_id(self, app_id: u32) -> Self {
        if app_id == 0 {
            return self;
        }
        self.set("appid", app_id.to_string())
    }

    /// Excludes servers running `app_id`.
    pub fn napp(self, app_id: u32) -> Self {
        self.push("napp", Some(app_id.to_string()))
    }

    /// Negates the conditions that follow; `count` is how many of them.
    pub fn nand(self, count: u32) -> Self {
        self.push("nand", Some(count.to_string()))
    }

    pub fn nor(self, count: u32) -> Self {
        self.push("nor", Some(count.to_string()))
    }
}

impl fmt::Display for ServerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_servers {
            return Ok(());
        }
        for (key, value) in &self.entries {
            write!(f, "\\{}", key)?;
            if let Some(value) = value.as_deref().filter(|value| !value.is_empty()) {
                write!(f, "\\{}", value)?;
            }
        }
        Ok(())
    }
}
