//! Stack deploy (spec §4.4 "Stack deploy", the hardest piece): linearizes
//! a compose source (inlining v2-style `extends:`), stages every file
//! reference (env_file, configs, secrets, extends targets) onto the
//! manager via SCP, rewrites the compose document to point at the staged
//! copies, deploys, then tears the staging directory down.
//!
//! The compose document is carried as a `serde_json::Value` so the same
//! [`machinery_model::merge`] used for `include:`/`extends:` at the
//! cluster level also drives service-level `extends:` here.

use std::path::{Path, PathBuf};

use machinery_core::error::{MachineryError, Result};
use machinery_model::merge::merge;
use machinery_remote::ssh::UnixRemote;
use machinery_tool::runner::{RunOptions, Tool, ToolRunner};
use serde_json::Value;
use tracing::warn;

const MAX_EXTENDS_DEPTH: usize = 10;

/// A compose document after `extends:` inlining, plus every local file it
/// still references (env_file / configs / secrets), ready for staging.
pub struct Linearized {
    pub document: Value,
    pub references: Vec<PathBuf>,
}

fn load_yaml_as_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_yaml_ng::from_str(&text)?;
    Ok(value)
}

/// Inlines `services.*.extends` (spec step 1), bounded by
/// [`MAX_EXTENDS_DEPTH`] to guard against cyclic references.
pub fn linearize(compose_path: &Path) -> Result<Linearized> {
    let base_dir = compose_path.parent().unwrap_or_else(|| Path::new("."));
    let mut document = load_yaml_as_json(compose_path)?;
    let mut references = Vec::new();

    if let Some(services) = document.get_mut("services").and_then(Value::as_object_mut) {
        let names: Vec<String> = services.keys().cloned().collect();
        for name in names {
            let service = services.get(&name).cloned().unwrap_or(Value::Null);
            let resolved = inline_extends(service, base_dir, &mut references, 0)?;
            services.insert(name, resolved);
        }
    }

    collect_file_references(&document, base_dir, &mut references);
    Ok(Linearized { document, references })
}

fn inline_extends(
    mut service: Value,
    base_dir: &Path,
    references: &mut Vec<PathBuf>,
    depth: usize,
) -> Result<Value> {
    let Some(extends) = service.get("extends").cloned() else {
        return Ok(service);
    };
    if depth >= MAX_EXTENDS_DEPTH {
        warn!("extends depth budget exhausted, stopping inlining for this service");
        if let Some(obj) = service.as_object_mut() {
            obj.remove("extends");
        }
        return Ok(service);
    }

    let file_rel = extends.get("file").and_then(Value::as_str);
    let target_service = extends.get("service").and_then(Value::as_str);

    let Some(target_service) = target_service else {
        if let Some(obj) = service.as_object_mut() {
            obj.remove("extends");
        }
        return Ok(service);
    };

    let (referenced_path, referenced_base) = match file_rel {
        Some(rel) => {
            let path = base_dir.join(rel);
            (Some(path.clone()), path.parent().map(Path::to_path_buf).unwrap_or_else(|| base_dir.to_path_buf()))
        }
        None => (None, base_dir.to_path_buf()),
    };

    let Some(source_path) = referenced_path else {
        // `extends: {service: X}` with no `file:` refers to this same document.
        return Err(MachineryError::Resolution(
            "extends without a file: key requires self-document lookup, unsupported".to_string(),
        ));
    };
    references.push(source_path.clone());
    let referenced_doc = load_yaml_as_json(&source_path)?;

    let base_service = referenced_doc
        .get("services")
        .and_then(|s| s.get(target_service))
        .cloned()
        .ok_or_else(|| {
            MachineryError::Resolution(format!(
                "extends target service '{target_service}' not found in referenced file"
            ))
        })?;

    let base_service = inline_extends(base_service, &referenced_base, references, depth + 1)?;

    if let Some(obj) = service.as_object_mut() {
        obj.remove("extends");
    }
    Ok(merge(base_service, service))
}

/// Walks the linearized document collecting every local file a service
/// (or the stack's top-level `configs:`/`secrets:`) references, so the
/// caller can stage them (spec step 2).
fn collect_file_references(document: &Value, base_dir: &Path, references: &mut Vec<PathBuf>) {
    if let Some(services) = document.get("services").and_then(Value::as_object) {
        for service in services.values() {
            if let Some(env_file) = service.get("env_file") {
                for entry in env_file_entries(env_file) {
                    references.push(base_dir.join(entry));
                }
            }
        }
    }
    for top_level_key in ["configs", "secrets"] {
        if let Some(entries) = document.get(top_level_key).and_then(Value::as_object) {
            for entry in entries.values() {
                if let Some(file) = entry.get("file").and_then(Value::as_str) {
                    references.push(base_dir.join(file));
                }
            }
        }
    }
}

fn env_file_entries(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

/// Rewrites every reference this document holds (`env_file`, `configs.*
/// .file`, `secrets.*.file`) to just its basename, since every staged file
/// lands flat inside the same remote directory as the compose file itself.
fn rewrite_references(document: &mut Value, base_dir: &Path) {
    if let Some(services) = document.get_mut("services").and_then(Value::as_object_mut) {
        for service in services.values_mut() {
            if let Some(env_file) = service.get_mut("env_file") {
                *env_file = match std::mem::take(env_file) {
                    Value::String(s) => Value::String(basename_of(base_dir, &s)),
                    Value::Array(items) => Value::Array(
                        items
                            .into_iter()
                            .map(|v| match v.as_str() {
                                Some(s) => Value::String(basename_of(base_dir, s)),
                                None => v,
                            })
                            .collect(),
                    ),
                    other => other,
                };
            }
        }
    }
    for top_level_key in ["configs", "secrets"] {
        if let Some(entries) = document.get_mut(top_level_key).and_then(Value::as_object_mut) {
            for entry in entries.values_mut() {
                if let Some(obj) = entry.as_object_mut() {
                    if let Some(Value::String(file)) = obj.get("file").cloned() {
                        obj.insert("file".to_string(), Value::String(basename_of(base_dir, &file)));
                    }
                }
            }
        }
    }
}

fn basename_of(base_dir: &Path, rel: &str) -> String {
    base_dir
        .join(rel)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(rel)
        .to_string()
}

/// Derives the remote staging directory name: the tail of the compose
/// file's own directory plus its filename stem (spec step 2, `dirbase =
/// dir-tail + stem`).
pub fn staging_dir_name(compose_path: &Path) -> String {
    let dir_tail = compose_path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("stack");
    let stem = compose_path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("compose");
    format!("{dir_tail}-{stem}")
}

/// Lists the stacks currently known to `manager_machine` (`docker stack ls`),
/// used to resolve stack names against live state per the name-comparison
/// rule of spec §4.10 before `ps`/`services`/`rm`/`down`/deploy act on them.
pub fn stack_ls(runner: &ToolRunner, manager_machine: &str) -> Result<Vec<String>> {
    let remote = UnixRemote::new(runner, manager_machine);
    let lines = remote.exec(
        &[
            "docker".to_string(),
            "stack".to_string(),
            "ls".to_string(),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ],
        false,
    )?;
    Ok(lines.into_iter().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
}

/// True when `name` matches one of the stacks already running on
/// `manager_machine`, per the name-comparison rule of spec §4.10.
pub fn is_running(runner: &ToolRunner, manager_machine: &str, name: &str) -> Result<bool> {
    let running = stack_ls(runner, manager_machine)?;
    Ok(running.iter().any(|existing| machinery_core::name::name_eq_default(existing, name)))
}

fn scp_to_machine(runner: &ToolRunner, local: &Path, machine: &str, remote_path: &str) -> Result<()> {
    runner.run(
        Tool::DockerMachine,
        &[
            "scp".to_string(),
            local.to_string_lossy().to_string(),
            format!("{machine}:{remote_path}"),
        ],
        &RunOptions::default(),
    )?;
    Ok(())
}

/// Deploys `compose_path` as stack `name` on `manager_machine` (spec
/// steps 2-4): linearize, stage every reference plus the rewritten
/// compose file into a fresh remote directory, `docker stack deploy`,
/// then remove the remote directory and the local rewrite (step 5).
pub fn deploy(
    runner: &ToolRunner,
    manager_machine: &str,
    compose_path: &Path,
    name: &str,
    extra_args: &[String],
) -> Result<()> {
    let base_dir = compose_path.parent().unwrap_or_else(|| Path::new("."));
    let mut linearized = linearize(compose_path)?;
    rewrite_references(&mut linearized.document, base_dir);

    let rewritten_yaml = serde_yaml_ng::to_string(&linearized.document)?;
    let local_tmp = tempfile::NamedTempFile::new()?;
    std::fs::write(local_tmp.path(), &rewritten_yaml)?;

    let remote_dir = format!("/tmp/{}", staging_dir_name(compose_path));
    let remote = UnixRemote::new(runner, manager_machine);
    remote.exec(&["mkdir".to_string(), "-p".to_string(), remote_dir.clone()], false)?;

    let cleanup = || {
        let _ = remote.exec(&["rm".to_string(), "-rf".to_string(), remote_dir.clone()], false);
    };

    let result = (|| -> Result<()> {
        for local_path in &linearized.references {
            if !local_path.exists() {
                warn!(path = %local_path.display(), "stack deploy reference file missing, skipping");
                continue;
            }
            let basename = local_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| MachineryError::Resolution("non-UTF8 reference file name".to_string()))?;
            scp_to_machine(runner, local_path, manager_machine, &format!("{remote_dir}/{basename}"))?;
        }

        let remote_compose = format!("{remote_dir}/docker-compose.yml");
        scp_to_machine(runner, local_tmp.path(), manager_machine, &remote_compose)?;

        let mut args = vec![
            "docker".to_string(),
            "stack".to_string(),
            "deploy".to_string(),
            "--compose-file".to_string(),
            remote_compose,
        ];
        args.extend(extra_args.iter().cloned());
        args.push(name.to_string());
        remote.exec(&args, false)?;
        Ok(())
    })();

    cleanup();
    let _ = std::fs::remove_file(local_tmp.path());

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn linearize_inlines_extends_and_collects_references() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "base.yml",
            "services:\n  web:\n    image: nginx\n    env_file: base.env\n",
        );
        write_file(dir.path(), "base.env", "FOO=bar\n");
        write_file(dir.path(), "secrets.env", "SECRET=1\n");
        let compose_path = write_file(
            dir.path(),
            "docker-compose.yml",
            "services:\n  web:\n    extends:\n      file: base.yml\n      service: web\n    env_file: secrets.env\n",
        );

        let linearized = linearize(&compose_path).unwrap();
        let web = &linearized.document["services"]["web"];
        assert_eq!(web["image"], "nginx");
        assert!(web.get("extends").is_none());
        assert_eq!(linearized.references.len(), 2);
    }

    #[test]
    fn rewrite_flattens_references_to_basenames() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "secrets.env", "SECRET=1\n");
        let compose_path = write_file(
            dir.path(),
            "docker-compose.yml",
            "services:\n  web:\n    image: nginx\n    env_file: secrets.env\n",
        );
        let mut linearized = linearize(&compose_path).unwrap();
        rewrite_references(&mut linearized.document, dir.path());
        assert_eq!(linearized.document["services"]["web"]["env_file"], "secrets.env");
    }

    #[test]
    fn staging_dir_name_combines_parent_tail_and_stem() {
        let path = Path::new("/home/user/myapp/docker-compose.yml");
        assert_eq!(staging_dir_name(path), "myapp-docker-compose");
    }
}
