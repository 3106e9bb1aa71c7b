//! Prometheus text exposition format.
//!
//! Memory is exported in bytes and CPU in cores. Used memory and pod
//! counts come from the raw tracked usage, so departments without a quota
//! record are still visible here.

use std::fmt::Write;

use quotawatch_state::{ArchClass, DepartmentAggregate, DepartmentView, NodeView, Quantity};

/// Everything one scrape renders.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsInput<'a> {
    /// Department rows, one per quota record.
    pub departments: &'a [DepartmentView],
    /// Every tracked department with its totals.
    pub usage: &'a [(String, DepartmentAggregate)],
    pub nodes: &'a [NodeView],
}

/// Render one scrape.
pub fn render_prometheus(input: &MetricsInput<'_>) -> String {
    let mut out = String::new();

    header(
        &mut out,
        "quotawatch_department_used_memory_bytes",
        "Tracked memory usage of a department per pool.",
    );
    for (department, aggregate) in input.usage {
        for pool in ArchClass::ALL {
            sample(
                &mut out,
                "quotawatch_department_used_memory_bytes",
                &[("department", department.as_str()), ("pool", pool.as_str())],
                aggregate.memory.get(pool),
            );
        }
    }

    header(
        &mut out,
        "quotawatch_department_pods",
        "Tracked workload instances of a department.",
    );
    for (department, aggregate) in input.usage {
        let _ = writeln!(
            out,
            "quotawatch_department_pods{{department=\"{}\"}} {}",
            escape_label(department),
            aggregate.instance_count
        );
    }

    header(
        &mut out,
        "quotawatch_department_limit_memory_bytes",
        "Quota memory limit of a department per pool.",
    );
    for row in input.departments {
        for pool in ArchClass::ALL {
            sample(
                &mut out,
                "quotawatch_department_limit_memory_bytes",
                &[("department", row.name.as_str()), ("pool", pool.as_str())],
                row.limit_memory(pool),
            );
        }
    }

    header(
        &mut out,
        "quotawatch_department_announced_memory_bytes",
        "Usage last announced in a department's quota record, per pool.",
    );
    for row in input.departments {
        let announced = [
            (ArchClass::NonXc, row.announced.non_xc.limits.memory),
            (ArchClass::XcArm, row.announced.xc.arm.limits.memory),
            (ArchClass::XcX86, row.announced.xc.x86.limits.memory),
        ];
        for (pool, memory) in announced {
            sample(
                &mut out,
                "quotawatch_department_announced_memory_bytes",
                &[("department", row.name.as_str()), ("pool", pool.as_str())],
                memory,
            );
        }
    }

    let node_gauges: [(&str, &str, fn(&NodeView) -> Quantity); 4] = [
        (
            "quotawatch_node_allocatable_cpu_cores",
            "Allocatable CPU of a node.",
            |n| n.allocatable.cpu,
        ),
        (
            "quotawatch_node_allocatable_memory_bytes",
            "Allocatable memory of a node.",
            |n| n.allocatable.memory,
        ),
        (
            "quotawatch_node_used_cpu_cores",
            "Instantaneous CPU usage of a node.",
            |n| n.used.cpu,
        ),
        (
            "quotawatch_node_used_memory_bytes",
            "Instantaneous memory usage of a node.",
            |n| n.used.memory,
        ),
    ];
    for (name, help, value) in node_gauges {
        header(&mut out, name, help);
        for node in input.nodes {
            sample(
                &mut out,
                name,
                &[("node", node.name.as_str()), ("type", node.arch.as_str())],
                value(node),
            );
        }
    }

    out
}

fn header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}

fn sample(out: &mut String, name: &str, labels: &[(&str, &str)], value: Quantity) {
    let labels: Vec<String> = labels
        .iter()
        .map(|(key, val)| format!("{key}=\"{}\"", escape_label(val)))
        .collect();
    let _ = writeln!(out, "{name}{{{}}} {}", labels.join(","), value.as_f64());
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
