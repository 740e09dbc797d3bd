//! Root and session key material, polymorphic over protocol version.
//!
//! Mirrors the newtype-over-`[u8; N]` pattern used for LoRaWAN key types
//! elsewhere in the ecosystem, but keeps root/session state grouped by
//! version instead of a base-class-plus-subclass hierarchy.

use crate::error::{Error, Result};

macro_rules! key16 {
    ($(#[$outer:meta])* pub struct $name:ident;) => {
        $(#[$outer])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub [u8; 16]);

        impl From<[u8; 16]> for $name {
            fn from(v: [u8; 16]) -> Self {
                $name(v)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

key16!(
    /// AppKey (1.0.2 root key, also used by 1.1 as the application root key).
    pub struct AppKey;
);
key16!(
    /// NwkKey, 1.1 network root key.
    pub struct NwkKey;
);
key16!(pub struct NwkSKey;);
key16!(pub struct AppSKey;);
key16!(pub struct FNwkSIntKey;);
key16!(pub struct SNwkSIntKey;);
key16!(pub struct NwkSEncKey;);

macro_rules! eui8 {
    ($(#[$outer:meta])* pub struct $name:ident;) => {
        $(#[$outer])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub [u8; 8]);

        impl From<[u8; 8]> for $name {
            fn from(v: [u8; 8]) -> Self {
                $name(v)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

eui8!(
    /// AppEUI (1.0.2) / JoinEUI (1.1). Presented big-endian.
    pub struct AppEui;
);
eui8!(pub struct DevEui;);

/// Root keys held by the application, prior to a join.
#[derive(Debug, Clone)]
pub enum RootKeys {
    V102 {
        app_eui: AppEui,
        app_key: AppKey,
        dev_eui: DevEui,
    },
    V110 {
        join_eui: AppEui,
        nwk_key: NwkKey,
        app_key: AppKey,
        dev_eui: DevEui,
    },
}

impl RootKeys {
    pub fn dev_eui(&self) -> DevEui {
        match self {
            RootKeys::V102 { dev_eui, .. } => *dev_eui,
            RootKeys::V110 { dev_eui, .. } => *dev_eui,
        }
    }

    pub fn app_or_join_eui(&self) -> AppEui {
        match self {
            RootKeys::V102 { app_eui, .. } => *app_eui,
            RootKeys::V110 { join_eui, .. } => *join_eui,
        }
    }

    /// Key used to MIC a join-request / rejoin-request.
    pub fn join_mic_key(&self) -> &[u8; 16] {
        match self {
            RootKeys::V102 { app_key, .. } => &app_key.0,
            RootKeys::V110 { nwk_key, .. } => &nwk_key.0,
        }
    }

    /// Key used to ECB-(de/en)crypt a join-accept payload.
    pub fn join_accept_key(&self) -> &[u8; 16] {
        match self {
            RootKeys::V102 { app_key, .. } => &app_key.0,
            RootKeys::V110 { nwk_key, .. } => &nwk_key.0,
        }
    }
}

/// Session keys derived after a join, polymorphic over protocol version.
#[derive(Debug, Clone)]
pub enum Session {
    V102 {
        dev_addr: u32,
        nwk_skey: NwkSKey,
        app_skey: AppSKey,
        fcnt_up: u32,
        fcnt_down: u32,
    },
    V110 {
        dev_addr: u32,
        f_nwk_s_int_key: FNwkSIntKey,
        s_nwk_s_int_key: SNwkSIntKey,
        nwk_s_enc_key: NwkSEncKey,
        app_skey: AppSKey,
        fcnt_up: u32,
        fcnt_down: u32,
    },
}

impl Session {
    pub fn dev_addr(&self) -> u32 {
        match self {
            Session::V102 { dev_addr, .. } => *dev_addr,
            Session::V110 { dev_addr, .. } => *dev_addr,
        }
    }

    pub fn fcnt_up(&self) -> u32 {
        match self {
            Session::V102 { fcnt_up, .. } => *fcnt_up,
            Session::V110 { fcnt_up, .. } => *fcnt_up,
        }
    }

    pub fn fcnt_down(&self) -> u32 {
        match self {
            Session::V102 { fcnt_down, .. } => *fcnt_down,
            Session::V110 { fcnt_down, .. } => *fcnt_down,
        }
    }

    pub fn app_skey(&self) -> &AppSKey {
        match self {
            Session::V102 { app_skey, .. } => app_skey,
            Session::V110 { app_skey, .. } => app_skey,
        }
    }

    /// Key used for MIC in 1.0.2 (either direction) and for the downlink MIC
    /// in 1.1.
    pub fn nwk_mic_key_down(&self) -> Result<&[u8; 16]> {
        match self {
            Session::V102 { nwk_skey, .. } => Ok(&nwk_skey.0),
            Session::V110 {
                s_nwk_s_int_key, ..
            } => Ok(&s_nwk_s_int_key.0),
        }
    }

    pub fn f_nwk_s_int_key(&self) -> Result<&[u8; 16]> {
        match self {
            Session::V102 { nwk_skey, .. } => Ok(&nwk_skey.0),
            Session::V110 {
                f_nwk_s_int_key, ..
            } => Ok(&f_nwk_s_int_key.0),
        }
    }

    pub fn s_nwk_s_int_key(&self) -> Result<&[u8; 16]> {
        match self {
            Session::V102 { nwk_skey, .. } => Ok(&nwk_skey.0),
            Session::V110 {
                s_nwk_s_int_key, ..
            } => Ok(&s_nwk_s_int_key.0),
        }
    }

    /// Key used to encrypt FRMPayload when FPort == 0 (1.0.2: NwkSKey; 1.1: NwkSEncKey).
    pub fn fport0_enc_key(&self) -> &[u8; 16] {
        match self {
            Session::V102 { nwk_skey, .. } => &nwk_skey.0,
            Session::V110 { nwk_s_enc_key, .. } => &nwk_s_enc_key.0,
        }
    }
}

/// Fails with `MissingKey(name)` — used at accessors over optional session
/// or root-key slots rather than falling back to a default.
pub fn missing(name: &'static str) -> Error {
    Error::MissingKey(name)
}
