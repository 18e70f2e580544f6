//! `proposals`: list persisted multisig proposals

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use dsync_core::{NetworkId, ProposalRecord, ProposalStatus, ProposalStore, SyncConfig};
use dsync_effects::FileProposalStore;

/// One line per record, grouped as the store returns them
pub fn render(records: &[ProposalRecord]) -> String {
    if records.is_empty() {
        return "no proposals\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        let status = match record.status {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Executed => "executed",
        };
        let _ = writeln!(
            out,
            "{} safe {:#x} nonce {} {status}: to {:#x} hash {} by {:#x} at {}",
            record.network,
            record.authority,
            record.nonce,
            record.to,
            record.hash,
            record.proposer,
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }
    out
}

/// Records of `network` (or of every network) in `store`
pub async fn list(store: &dyn ProposalStore, network: Option<&str>) -> Result<Vec<ProposalRecord>> {
    let network = network.map(NetworkId::new);
    Ok(store.list(network.as_ref()).await?)
}

/// Print the proposals of the store configured in `config_path`
pub async fn run(config_path: &Path, network: Option<&str>) -> Result<()> {
    let config = SyncConfig::load(config_path)?;
    let store = FileProposalStore::new(&config.store.path);
    let records = list(&store, network).await?;
    print!("{}", render(&records));
    Ok(())
}
