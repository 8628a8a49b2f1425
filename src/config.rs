use embassy_time::Duration;

/// APN selection for the data bearer.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Apn<'a> {
    #[default]
    None,
    Given {
        name: &'a str,
        username: Option<&'a str>,
        password: Option<&'a str>,
    },
}

/// Configuration of a [`GprsClient`](crate::client::GprsClient).
///
/// All parameters are fixed for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct Config<'a> {
    pub(crate) apn: Apn<'a>,
    pub(crate) skip_attach: bool,
    pub(crate) http_headers: Option<&'a str>,
    pub(crate) content_type: Option<&'a str>,
    pub(crate) cmd_cooldown: Duration,
    pub(crate) signal_timeout: Duration,
    pub(crate) registration_timeout: Duration,
}

impl Default for Config<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Config<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            apn: Apn::None,
            skip_attach: false,
            http_headers: None,
            content_type: None,
            cmd_cooldown: Duration::from_millis(20),
            signal_timeout: Duration::from_secs(30),
            registration_timeout: Duration::from_secs(120),
        }
    }

    #[must_use]
    pub fn with_apn(mut self, apn: Apn<'a>) -> Self {
        self.apn = apn;
        self
    }

    /// Skip the explicit GPRS service attach (`AT+CGATT`) during connect.
    ///
    /// Some module firmwares attach implicitly on bearer activation, and an
    /// explicit attach can fail or stall there.
    #[must_use]
    pub fn skip_attach(mut self) -> Self {
        self.skip_attach = true;
        self
    }

    /// Extra HTTP headers, injected verbatim into every HTTP request.
    #[must_use]
    pub fn with_http_headers(mut self, headers: &'a str) -> Self {
        self.http_headers = Some(headers);
        self
    }

    /// Content type for HTTP POST bodies.
    #[must_use]
    pub fn with_content_type(mut self, content_type: &'a str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    #[must_use]
    pub fn cmd_cooldown(mut self, cooldown: Duration) -> Self {
        self.cmd_cooldown = cooldown;
        self
    }

    /// Overall deadline for the signal-quality poll during connect.
    #[must_use]
    pub fn signal_timeout(mut self, timeout: Duration) -> Self {
        self.signal_timeout = timeout;
        self
    }

    /// Overall deadline for the network-registration poll during connect.
    #[must_use]
    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }
}
