use anyhow::Result;

use crate::toolbox::{ServiceAction, Toolbox};

const WEB_SERVER_UNITS: [&str; 4] = ["apache2", "httpd", "nginx", "lighttpd"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceSelection {
    /// Touch whichever web server and PHP-FPM units are currently active.
    #[default]
    Auto,
    Units(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedServiceAction {
    pub unit: String,
    pub action: ServiceAction,
}

pub fn is_web_server_unit(unit: &str) -> bool {
    WEB_SERVER_UNITS.contains(&unit)
}

pub fn is_php_runtime_unit(unit: &str) -> bool {
    unit == "php-fpm" || (unit.starts_with("php") && unit.ends_with("-fpm"))
}

/// PHP-FPM units restart; everything else reloads.
pub fn action_for_unit(unit: &str) -> ServiceAction {
    if is_php_runtime_unit(unit) {
        ServiceAction::Restart
    } else {
        ServiceAction::Reload
    }
}

pub fn plan_service_actions<T: Toolbox + ?Sized>(
    selection: &ServiceSelection,
    toolbox: &T,
) -> Result<Vec<PlannedServiceAction>> {
    let units = match selection {
        ServiceSelection::Units(units) => units.clone(),
        ServiceSelection::Auto => toolbox
            .active_services()?
            .into_iter()
            .filter(|unit| is_web_server_unit(unit) || is_php_runtime_unit(unit))
            .collect(),
    };

    let mut planned: Vec<PlannedServiceAction> = Vec::with_capacity(units.len());
    for unit in units {
        let unit = unit.trim().trim_end_matches(".service").to_string();
        if unit.is_empty() || planned.iter().any(|existing| existing.unit == unit) {
            continue;
        }
        planned.push(PlannedServiceAction {
            action: action_for_unit(&unit),
            unit,
        });
    }
    // PHP-FPM units before web servers
    planned.sort_by_key(|item| !is_php_runtime_unit(&item.unit));
    Ok(planned)
}
