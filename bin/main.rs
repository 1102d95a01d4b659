//! ndproxyd: bridges IPv6 Neighbor Discovery between the interfaces of
//! each proxy group so the attached links behave as one subnet.
//!
//! Needs CAP_NET_RAW for its packet sockets.

use std::{cell::RefCell, process::ExitCode, rc::Rc, time::Duration};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ndproxy::proxy::{self, NdProxy};

#[derive(Debug, Parser)]
#[command(name = "ndproxyd", about = "IPv6 Neighbor Discovery proxy daemon")]
struct Args {
    /// Accept already-proxied router advertisements on upstream
    /// interfaces instead of treating them as loops.
    #[arg(long)]
    nested: bool,

    /// Interface to manage, repeatable. Interfaces named in --group are
    /// bound implicitly.
    #[arg(long = "interface", value_name = "IF")]
    interfaces: Vec<String>,

    /// Proxy group in the form name=if0,if1[,...]; suffix one member
    /// with '*' to make it the upstream. Repeatable.
    #[arg(long = "group", value_name = "SPEC")]
    groups: Vec<String>,

    /// Seconds between neighbor cache expiry sweeps.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    sweep_interval: u64,
}

struct GroupSpec {
    name: String,
    /// Members in order, each with an upstream marker.
    members: Vec<(String, bool)>,
}

fn parse_group_spec(spec: &str) -> Result<GroupSpec, String> {
    let Some((name, members)) = spec.split_once('=') else {
        return Err(format!("group spec {spec:?} is missing '='"));
    };
    let members: Vec<(String, bool)> = members
        .split(',')
        .filter(|m| !m.is_empty())
        .map(|member| match member.strip_suffix('*') {
            Some(stripped) => (stripped.to_string(), true),
            None => (member.to_string(), false),
        })
        .collect();
    if members.is_empty() {
        return Err(format!("group spec {spec:?} names no members"));
    }
    if members.iter().filter(|(_, upstream)| *upstream).count() > 1 {
        return Err(format!("group spec {spec:?} marks more than one upstream"));
    }
    Ok(GroupSpec {
        name: name.to_string(),
        members,
    })
}

fn apply_configuration(engine: &mut NdProxy, args: &Args) -> ndproxy::Result<()> {
    let specs: Vec<GroupSpec> = args
        .groups
        .iter()
        .map(|spec| parse_group_spec(spec))
        .collect::<Result<_, _>>()
        .map_err(|e| ndproxy::Error::with(ndproxy::ErrorKind::InvalidArgument, e))?;

    for if_name in &args.interfaces {
        engine.bind_interface(if_name)?;
    }
    for spec in &specs {
        for (member, _) in &spec.members {
            if !engine.is_managing(member) {
                engine.bind_interface(member)?;
            }
        }
    }
    for spec in &specs {
        engine.create_group(&spec.name)?;
        for (member, upstream) in &spec.members {
            engine.add_to_group(member, &spec.name, *upstream)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut engine = NdProxy::new(args.nested);
    engine.set_sweep_interval(Duration::from_secs(args.sweep_interval));
    if let Err(e) = apply_configuration(&mut engine, &args) {
        tracing::error!("invalid startup configuration: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("failed to build runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let engine = Rc::new(RefCell::new(engine));
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(async {
        tokio::select! {
            () = proxy::run(Rc::clone(&engine)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
            }
        }
    }));

    engine.borrow_mut().shutdown();
    ExitCode::SUCCESS
}
