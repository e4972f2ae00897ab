//! Builds the `StreamSinkFactory` the readers feed, fanning out across the
//! text-tree, InfluxDB, and libpq backends the CLI flags select.
//!
//! The InfluxDB and libpq factories are scaffolds whose `consume` always
//! returns `true` — the line-protocol and SQL mapping is left unspecified,
//! so they're wired up without inventing one (see DESIGN.md).

use crate::cli::ResolvedCli;
use log_aggregate::DEFAULT_WINDOW;
use log_sink::{CombinedSinkFactory, SimpleSinkFactory, StreamSinkFactory, StubConsumer};
use log_text::TextTreeOutput;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

/// Builds the top-level factory as a `CombinedSinkFactory` even when only
/// one child backend is enabled — `Rc<RefCell<dyn StreamSinkFactory>>`
/// requires a single concrete, sized type to coerce from, and the children
/// themselves are already type-erased behind `Box<dyn StreamSinkFactory>`.
pub async fn build(
    cli: &ResolvedCli,
) -> Result<Rc<RefCell<dyn StreamSinkFactory>>, log_transport::TransportError> {
    let mut children: Vec<Box<dyn StreamSinkFactory>> = Vec::new();

    if cli.text_tree {
        let output = crate::outputs::build(cli).await?;
        let tree = TextTreeOutput::new(output);
        children.push(Box::new(SimpleSinkFactory::new(tree).with_window(DEFAULT_WINDOW)));
    }
    if let Some(url) = &cli.influxdb_url {
        info!(%url, "influxdb sink factory enabled (scaffold: consume is a no-op)");
        children.push(Box::new(SimpleSinkFactory::new(StubConsumer).with_window(DEFAULT_WINDOW)));
    }
    if let Some(conn) = &cli.libpq_conn {
        info!(%conn, "libpq sink factory enabled (scaffold: consume is a no-op)");
        children.push(Box::new(SimpleSinkFactory::new(StubConsumer).with_window(DEFAULT_WINDOW)));
    }

    if children.is_empty() {
        let tree = TextTreeOutput::new(Box::new(log_text::StdoutOutput));
        children.push(Box::new(SimpleSinkFactory::new(tree).with_window(DEFAULT_WINDOW)));
    }

    Ok(Rc::new(RefCell::new(CombinedSinkFactory::new(children))))
}
