use crate::config::PackageIds;
use crate::domain::{Domain, EventKind};
use crate::transport::EventFilter;

/// One filter per event kind, each bound to its domain's package.
pub fn build_filters(packages: &PackageIds) -> Vec<EventFilter> {
    EventKind::ALL
        .iter()
        .map(|kind| {
            let package = match kind.domain() {
                Domain::Pair => &packages.pair,
                Domain::Farm => &packages.farm,
                Domain::Locker => &packages.locker,
            };
            EventFilter::new(package.clone(), *kind)
        })
        .collect()
}
