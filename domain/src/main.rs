use std::env;
use std::process;
use std::time::SystemTime;

use domain::adapters::memory_repo::{InMemoryDemandRepo, InMemoryOrganizationRepo};
use domain::ident::SequentialIdGenerator;
use domain::service::{DemandService, NewDemand, NewOrganization, OrganizationService};
use domain::{Clock, DemandPriority, Email, EntityId, IdGenerator, OrganizationRepository};

struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

fn print_usage() {
    eprintln!(
        "{}\n\nUsage:\n  domain org-add <name> [--city <city>] [--phone <phone>]\n  domain org-show <id>\n  domain demand-add <org-name> <title> [--priority <low|normal|high|urgent>]\n\nNotes:\n  - This demo CLI uses in-memory repositories; data is not persisted across runs.",
        domain::about()
    );
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1); // skip program name

    let Some(cmd) = args.next() else {
        print_usage();
        return Ok(());
    };

    // Construct demo services with in-memory storage
    let clock = StdClock;
    let org_svc = OrganizationService::new(
        InMemoryOrganizationRepo::new(),
        SequentialIdGenerator::new("org", 4),
        StdClock,
    );

    match cmd.as_str() {
        "org-add" => {
            let Some(name) = args.next() else {
                return Err("missing <name> for org-add".into());
            };

            let mut city: Option<String> = None;
            let mut phone: Option<String> = None;

            // Parse simple flags: --city <val>, --phone <val>
            let rest: Vec<String> = args.collect();
            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--city" => {
                        if i + 1 >= rest.len() {
                            return Err("--city requires a value".into());
                        }
                        city = Some(rest[i + 1].clone());
                        i += 2;
                    }
                    "--phone" => {
                        if i + 1 >= rest.len() {
                            return Err("--phone requires a value".into());
                        }
                        phone = Some(rest[i + 1].clone());
                        i += 2;
                    }
                    unk => {
                        return Err(format!("unknown argument: {}", unk));
                    }
                }
            }

            match org_svc.create(NewOrganization {
                name,
                city,
                phone,
                ..Default::default()
            }) {
                Ok(org) => {
                    println!("created: {} -> {}", org.id.as_str(), org.name);
                    Ok(())
                }
                Err(e) => Err(format!("org-add failed: {}", e)),
            }
        }
        "org-show" => {
            let Some(id_str) = args.next() else {
                return Err("missing <id> for org-show".into());
            };
            let id = match EntityId::new(id_str) {
                Ok(id) => id,
                Err(e) => return Err(format!("invalid id: {}", e)),
            };
            match org_svc.get(&id) {
                Ok(Some(org)) => {
                    println!("{}: {}", org.id.as_str(), org.name);
                    Ok(())
                }
                Ok(None) => Err("not found".into()),
                Err(e) => Err(format!("org-show failed: {}", e)),
            }
        }
        "demand-add" => {
            let Some(org_name) = args.next() else {
                return Err("missing <org-name> for demand-add".into());
            };
            let Some(title) = args.next() else {
                return Err("missing <title> for demand-add".into());
            };

            let mut priority: Option<DemandPriority> = None;
            let rest: Vec<String> = args.collect();
            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--priority" => {
                        if i + 1 >= rest.len() {
                            return Err("--priority requires a value".into());
                        }
                        match DemandPriority::parse(&rest[i + 1]) {
                            Some(p) => priority = Some(p),
                            None => return Err(format!("invalid priority: {}", rest[i + 1])),
                        }
                        i += 2;
                    }
                    unk => {
                        return Err(format!("unknown argument: {}", unk));
                    }
                }
            }

            // The org and demand live in the same in-memory run, so file the
            // demand against a freshly created organization.
            domain::validate::validate_name("name", &org_name)
                .map_err(|e| format!("demand-add failed: {}", e))?;
            let orgs = InMemoryOrganizationRepo::new();
            let org_ids = SequentialIdGenerator::new("org", 4);
            let org = domain::Organization::new(org_ids.next_id(), org_name, clock.now());
            orgs.create(org.clone())
                .map_err(|e| format!("demand-add failed: {}", e))?;

            let created_by = match Email::new("dev@local.example") {
                Ok(e) => e,
                Err(_) => return Err("invalid default user".into()),
            };
            let demand_svc = DemandService::new(
                InMemoryDemandRepo::new(),
                orgs,
                SequentialIdGenerator::new("dem", 4),
                clock,
            );
            match demand_svc.create(NewDemand {
                organization_id: org.id.clone(),
                title,
                description: None,
                priority,
                created_by,
            }) {
                Ok(demand) => {
                    println!(
                        "created: {} [{}] {} (org {})",
                        demand.id.as_str(),
                        demand.priority.as_str(),
                        demand.title,
                        org.id.as_str()
                    );
                    Ok(())
                }
                Err(e) => Err(format!("demand-add failed: {}", e)),
            }
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn main() {
    if let Err(msg) = run() {
        eprintln!("error: {}", msg);
        process::exit(1);
    }
}
