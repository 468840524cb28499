//! Normalizes the loose `ShareSpec` shapes (`spec.md` §4.6: single path,
//! `[host, guest, type]`, or `host:guest:type`) into a resolved triple, with
//! the type defaulting from the owning machine's driver.

use machinery_core::error::{MachineryError, Result};
use machinery_model::ShareSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareType {
    VboxSf,
    Rsync,
}

impl ShareType {
    fn parse(raw: &str) -> Result<ShareType> {
        match raw {
            "vboxsf" => Ok(ShareType::VboxSf),
            "rsync" => Ok(ShareType::Rsync),
            other => Err(MachineryError::Config(format!(
                "unsupported share type '{other}', expected vboxsf or rsync"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedShare {
    pub host: String,
    pub guest: String,
    pub share_type: ShareType,
}

/// `virtualbox` defaults to `vboxsf`; every other driver defaults to
/// `rsync` (spec §4.6).
fn default_type_for_driver(driver: &str) -> &'static str {
    if driver == "virtualbox" {
        "vboxsf"
    } else {
        "rsync"
    }
}

pub fn resolve(spec: &ShareSpec, driver: &str) -> Result<ResolvedShare> {
    let default_type = default_type_for_driver(driver);
    match spec {
        ShareSpec::Path(path) => Ok(ResolvedShare {
            host: path.clone(),
            guest: path.clone(),
            share_type: ShareType::parse(default_type)?,
        }),
        ShareSpec::Colon(spec_str) => {
            let parts: Vec<&str> = spec_str.split(':').collect();
            match parts.as_slice() {
                [host, guest] => Ok(ResolvedShare {
                    host: host.to_string(),
                    guest: guest.to_string(),
                    share_type: ShareType::parse(default_type)?,
                }),
                [host, guest, share_type] => Ok(ResolvedShare {
                    host: host.to_string(),
                    guest: guest.to_string(),
                    share_type: ShareType::parse(share_type)?,
                }),
                [single] => Ok(ResolvedShare {
                    host: single.to_string(),
                    guest: single.to_string(),
                    share_type: ShareType::parse(default_type)?,
                }),
                _ => Err(MachineryError::Config(format!(
                    "malformed share spec '{spec_str}'"
                ))),
            }
        }
        ShareSpec::List(items) => match items.as_slice() {
            [host, guest] => Ok(ResolvedShare {
                host: host.clone(),
                guest: guest.clone(),
                share_type: ShareType::parse(default_type)?,
            }),
            [host, guest, share_type] => Ok(ResolvedShare {
                host: host.clone(),
                guest: guest.clone(),
                share_type: ShareType::parse(share_type)?,
            }),
            _ => Err(MachineryError::Config(
                "share list must have 2 or 3 elements".to_string(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_path_defaults_by_driver() {
        let r = resolve(&ShareSpec::Path("/home/user/project".into()), "virtualbox").unwrap();
        assert_eq!(r.share_type, ShareType::VboxSf);
        assert_eq!(r.host, r.guest);

        let r = resolve(&ShareSpec::Path("/home/user/project".into()), "amazonec2").unwrap();
        assert_eq!(r.share_type, ShareType::Rsync);
    }

    #[test]
    fn colon_form_parses_three_parts() {
        let r = resolve(&ShareSpec::Colon("/host:/guest:rsync".into()), "virtualbox").unwrap();
        assert_eq!(r.host, "/host");
        assert_eq!(r.guest, "/guest");
        assert_eq!(r.share_type, ShareType::Rsync);
    }

    #[test]
    fn list_form_with_two_parts_uses_driver_default() {
        let r = resolve(
            &ShareSpec::List(vec!["/host".into(), "/guest".into()]),
            "virtualbox",
        )
        .unwrap();
        assert_eq!(r.share_type, ShareType::VboxSf);
    }

    #[test]
    fn invalid_type_is_rejected() {
        let err = resolve(&ShareSpec::Colon("/h:/g:nfs".into()), "virtualbox").unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }
}
