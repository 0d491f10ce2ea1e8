//! Walks a small service hierarchy through its full lifecycle.
//!
//! Run with `RUST_LOG=kiln_core=trace` to see every resolved point.

use kiln::member::Arguments;
use kiln::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

// === Define your types ===

#[derive(Clone)]
struct Config {
    database_url: String,
    pool_size: usize,
}

#[derive(Default)]
struct Connection {
    url: String,
    open: bool,
}

#[derive(Default)]
struct Repository {
    connection: Connection,
    table: String,
    pool_size: usize,
}

#[derive(Default)]
struct AuditedRepository {
    inner: Repository,
    audit_log: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config {
        database_url: "postgres://localhost/app".into(),
        pool_size: 8,
    };

    // === Declare the managed types ===

    let repository = TypeDeclaration::builder::<Repository>()
        .constructor([DependencyKey::of::<Config>()], |args: &mut Arguments| {
            let config: Config = args.take(0)?;
            Ok(Repository {
                connection: Connection {
                    url: config.database_url,
                    ..Connection::default()
                },
                pool_size: config.pool_size,
                ..Repository::default()
            })
        })
        .inject_named_field("table", "table", |r: &mut Repository, v: String| r.table = v)
        .post_construct("connect", |r| {
            r.connection.open = true;
            info!(url = %r.connection.url, table = %r.table, "Connected");
            Ok(())
        })
        .pre_destroy("disconnect", |r| {
            r.connection.open = false;
            info!(url = %r.connection.url, "Disconnected");
            Ok(())
        })
        .build();

    let audited = TypeDeclaration::builder::<AuditedRepository>()
        .default_constructor()
        .extends(|a: &mut AuditedRepository| &mut a.inner)
        .inject_method("audit", [DependencyKey::named::<String>("auditor")], |a, args| {
            let auditor: String = args.take(0)?;
            a.audit_log.push(format!("audited by {auditor}"));
            Ok(())
        })
        .pre_destroy("disconnect", |a| {
            info!(entries = a.audit_log.len(), "Flushing audit log before disconnect");
            a.inner.connection.open = false;
            Ok(())
        })
        .build();

    // === Build the engine ===

    let engine = Engine::builder()
        .declare(repository)
        .declare(audited)
        .value(config)
        .named_value("table", String::from("users"))
        .named_value("auditor", String::from("compliance"))
        .teardown_policy(TeardownPolicy::BestEffort)
        .build()?;

    engine.validate::<Repository>()?;
    engine.validate::<AuditedRepository>()?;

    // === Plain lifecycle ===

    let repo: Repository = engine.create()?;
    info!(
        table = %repo.table,
        pool_size = repo.pool_size,
        open = repo.connection.open,
        "Repository ready"
    );
    let report = engine.destroy(repo)?;
    info!(hooks = report.outcomes().len(), "Repository torn down");

    // === Subtype lifecycle, phase by phase ===

    let target = engine.injection_target::<Repository>()?;
    let context = engine.new_context::<AuditedRepository>();

    let mut audited = AuditedRepository {
        inner: target.produce_as::<Repository>(&context)?,
        ..AuditedRepository::default()
    };
    engine
        .injection_target::<AuditedRepository>()?
        .inject(&mut audited, &context)?;
    target.post_construct(&mut audited)?;

    info!(log = ?audited.audit_log, table = %audited.inner.table, "Audited repository ready");
    target.pre_destroy(&mut audited)?;
    info!(open = audited.inner.connection.open, "Audited repository torn down");

    Ok(())
}
