// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Print tables, flows and traces in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both ovpadm and integration tests.

use crate::engine::flow::Flow;
use crate::engine::table::Table;
use crate::engine::trace::Trace;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a table registry.
pub fn print_tables(tables: &[Table]) -> std::io::Result<()> {
    print_tables_into(&mut std::io::stdout(), tables)
}

/// Print a table registry into a given writer.
pub fn print_tables_into(
    writer: &mut impl Write,
    tables: &[Table],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "TABLE\tNEXT\tMISS")?;
    for table in tables {
        writeln!(
            t,
            "{}\t{}\t{}",
            table.id(),
            table.next(),
            table.miss_action()
        )?;
    }
    t.flush()
}

/// Print the header for the [`print_flow()`] output.
pub fn print_flow_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "TABLE\tPRI\tMATCH\tACTIONS")
}

/// Print a single [`Flow`].
pub fn print_flow(t: &mut impl Write, flow: &Flow) -> std::io::Result<()> {
    let m = flow.match_string();
    let m = if m.is_empty() { "*".to_string() } else { m };
    writeln!(
        t,
        "{}\t{}\t{}\t{}",
        flow.table(),
        flow.priority(),
        m,
        flow.action_string()
    )
}

/// Print a list of flows.
pub fn print_flows(flows: &[Flow]) -> std::io::Result<()> {
    print_flows_into(&mut std::io::stdout(), flows)
}

/// Print a list of flows into a given writer.
pub fn print_flows_into(
    writer: &mut impl Write,
    flows: &[Flow],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    print_flow_header(&mut t)?;
    for flow in flows {
        print_flow(&mut t, flow)?;
    }
    t.flush()
}

/// Print a [`Trace`].
pub fn print_trace(trace: &Trace) -> std::io::Result<()> {
    print_trace_into(&mut std::io::stdout(), trace)
}

/// Print a [`Trace`] into a given writer.
pub fn print_trace_into(
    writer: &mut impl Write,
    trace: &Trace,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    print_flow_header(&mut t)?;
    for step in &trace.steps {
        match &step.flow {
            Some(flow) => print_flow(&mut t, flow)?,
            None => writeln!(t, "{}\t--\t(miss)\t--", step.table)?,
        }
    }
    t.flush()?;

    write_hr(&mut t)?;
    writeln!(t, "Verdict: {}", trace.verdict)?;
    t.flush()
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::table::Bridge;
    use crate::engine::table::MissAction;
    use crate::engine::table::TableId;

    #[test]
    fn tables_are_aligned() {
        let br = Bridge::new("br-test");
        let tables = vec![
            br.create_table(TableId::new(0), TableId::new(10), MissAction::Next),
            br.create_table(TableId::new(10), TableId::LAST, MissAction::Drop),
        ];
        let mut out = vec![];
        print_tables_into(&mut out, &tables).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("TABLE"));
        assert!(lines[2].contains("LAST"));
        assert!(lines[2].contains("drop"));
    }

    #[test]
    fn flow_without_match_prints_wildcard() {
        let br = Bridge::new("br-test");
        let table =
            br.create_table(TableId::new(0), TableId::LAST, MissAction::Drop);
        let flows =
            vec![table.build_flow().priority(80).normal().done().unwrap()];
        let mut out = vec![];
        print_flows_into(&mut out, &flows).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.lines().nth(1).unwrap().contains('*'));
        assert!(out.contains("NORMAL"));
    }
}
