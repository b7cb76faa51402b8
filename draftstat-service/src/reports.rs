use anyhow::Result;
use colored::Colorize;
use draftstat_engine::{
    BatchDocuments, EngineStatus, Envelope, IndicatorSnapshot, IngestSummary, LiveMatrices,
    MatrixDocument, PatchSwitch, PoolUpdate, RebalanceEntry, Recommendation, RotationOutcome,
    Snapshot, VersionState,
};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// Everything a command can print.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Report {
    Pool(PoolUpdate),
    Patch(PatchSwitch),
    Ingest(IngestSummary),
    Rotation(RotationOutcome),
    Status(EngineStatus),
    Indicator(IndicatorSnapshot),
    Matrices(Option<LiveMatrices>),
    Rebalance(Snapshot<Vec<RebalanceEntry>>),
    Recommend(Snapshot<Vec<Recommendation>>),
    Served { files: usize, failed: usize },
}

pub fn generate_json_report(
    out: &mut dyn Write,
    result: std::result::Result<&Report, &anyhow::Error>,
) -> Result<()> {
    let envelope = Envelope::<Value>::from_result(result.map_err(|err| format!("{err:#}")));
    writeln!(out, "{}", serde_json::to_string_pretty(&envelope)?)?;
    Ok(())
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn batch_header(out: &mut dyn Write, patch_version: &str, batch: u32) -> Result<()> {
    writeln!(out, "Patch {} · batch {}", patch_version.bold(), batch.to_string().bold())?;
    Ok(())
}

fn cold_start(out: &mut dyn Write) -> Result<()> {
    writeln!(
        out,
        "{}",
        "No complete batch yet; reports start after the first rotation.".yellow()
    )?;
    Ok(())
}

pub fn generate_console_report(out: &mut dyn Write, report: &Report) -> Result<()> {
    match report {
        Report::Pool(pool) => {
            writeln!(out, "{}", "✅ Pool updated".green().bold())?;
            writeln!(out, "Patch version: {}", pool.patch_version.bold())?;
            writeln!(out, "Classes: {:?}", pool.class_pool)?;
            for (class_code, cards) in &pool.card_pools {
                writeln!(out, "  class {class_code}: {} cards", cards.len())?;
            }
        }
        Report::Patch(switch) => {
            let line = match switch {
                PatchSwitch::Unchanged => "Patch version unchanged".to_string(),
                PatchSwitch::Reattached { batch } => format!("Re-attached at batch {batch}"),
                PatchSwitch::Created { documents } => {
                    format!("Created batch 1 ({documents} documents)")
                }
            };
            writeln!(out, "{}", line.green())?;
        }
        Report::Ingest(summary) => {
            writeln!(out, "{}", "📥 Ingestion".bright_cyan().bold())?;
            writeln!(
                out,
                "Games: {} applied / {} seen",
                summary.games_applied.to_string().green(),
                summary.games_seen
            )?;
            writeln!(out, "Skipped (other patch): {}", summary.games_skipped_version)?;
            writeln!(out, "Malformed: {}", summary.games_malformed.to_string().red())?;
            writeln!(
                out,
                "Players: {} applied, {} skipped, {} winners",
                summary.players_applied, summary.players_skipped, summary.winning_players
            )?;
            writeln!(
                out,
                "Documents written: {} (attempts: {})",
                summary.documents_written, summary.attempts
            )?;
        }
        Report::Rotation(outcome) => match outcome {
            RotationOutcome::Idle => writeln!(out, "{}", "No active patch version.".yellow())?,
            RotationOutcome::NoPriorDocuments {
                patch_version,
                batch,
            } => writeln!(
                out,
                "{}",
                format!("Batch {patch_version}/{batch} is empty; not rotated.").yellow()
            )?,
            RotationOutcome::Rotated {
                patch_version,
                from,
                to,
                documents,
            } => writeln!(
                out,
                "{} {patch_version}: batch {from} → {to} ({documents} documents)",
                "🔄 Rotated".green().bold()
            )?,
        },
        Report::Status(status) => write_status(out, status)?,
        Report::Indicator(snapshot) => match snapshot {
            Snapshot::ColdStart => cold_start(out)?,
            Snapshot::Ready {
                patch_version,
                batch,
                data,
            } => {
                batch_header(out, patch_version, *batch)?;
                write_documents(out, data)?;
            }
        },
        Report::Matrices(None) => writeln!(out, "{}", "No active patch version.".yellow())?,
        Report::Matrices(Some(live)) => {
            batch_header(out, &live.patch_version, live.batch)?;
            write_documents(out, &live.documents)?;
        }
        Report::Rebalance(snapshot) => match snapshot {
            Snapshot::ColdStart => cold_start(out)?,
            Snapshot::Ready {
                patch_version,
                batch,
                data,
            } => {
                batch_header(out, patch_version, *batch)?;
                writeln!(
                    out,
                    "{:>6}  {:<20} {:>8} {:>8} {:>10}",
                    "id", "name", "pick", "win", "win|pick"
                )?;
                for entry in data {
                    writeln!(
                        out,
                        "{:>6}  {:<20} {:>8} {:>8} {:>10}",
                        entry.id,
                        entry.name.as_deref().unwrap_or("-"),
                        percent(entry.pick.rate),
                        percent(entry.win.rate),
                        percent(entry.win_given_pick).bold()
                    )?;
                }
            }
        },
        Report::Recommend(snapshot) => match snapshot {
            Snapshot::ColdStart => cold_start(out)?,
            Snapshot::Ready {
                patch_version,
                batch,
                data,
            } => {
                batch_header(out, patch_version, *batch)?;
                for recommendation in data {
                    let rank = if recommendation.rank <= f64::EPSILON {
                        percent(recommendation.rank).green()
                    } else {
                        percent(recommendation.rank).normal()
                    };
                    writeln!(
                        out,
                        "card {:>6} {:<20} score {:.4}  rank {rank}",
                        recommendation.card_id,
                        recommendation.name.as_deref().unwrap_or("-"),
                        recommendation.score
                    )?;
                }
            }
        },
        Report::Served { files, failed } => {
            writeln!(out, "Processed {files} inbox files ({failed} failed)")?;
        }
    }
    Ok(())
}

fn write_status(out: &mut dyn Write, status: &EngineStatus) -> Result<()> {
    writeln!(out, "{}", "📊 Draftstat status".bright_cyan().bold())?;
    match &status.version {
        VersionState::Uninitialized => writeln!(out, "Version: {}", "uninitialized".yellow())?,
        VersionState::Active {
            patch_version,
            batch,
        } => writeln!(out, "Version: patch {patch_version}, live batch {batch}")?,
    }
    writeln!(
        out,
        "Pool: {}",
        status.pool_patch_version.as_deref().unwrap_or("not configured")
    )?;
    writeln!(out, "Classes: {:?}", status.class_pool)?;
    match status.complete_batch {
        Some(batch) => writeln!(out, "Complete batch: {batch}")?,
        None => writeln!(out, "Complete batch: {}", "none (cold start)".yellow())?,
    }
    Ok(())
}

fn document_line(doc: &MatrixDocument) -> String {
    let picks = doc.aggregate().map_or(0, |matrix| matrix.diagonal_sum());
    format!(
        "{} v{} · {} contexts · Σdiag {picks} · {:016x}",
        doc.key,
        doc.version.unwrap_or_default(),
        doc.matrices.len(),
        doc.fingerprint()
    )
}

fn write_documents(out: &mut dyn Write, documents: &BatchDocuments) -> Result<()> {
    for (title, docs) in [("pick", &documents.pick), ("win", &documents.win)] {
        writeln!(out, "{}", title.bold())?;
        for doc in docs {
            writeln!(out, "  {}", document_line(doc))?;
        }
    }
    Ok(())
}

pub fn generate_markdown_report(out: &mut dyn Write, report: &Report) -> Result<()> {
    writeln!(out, "# Draftstat Report\n")?;
    match report {
        Report::Rebalance(Snapshot::Ready {
            patch_version,
            batch,
            data,
        }) => {
            writeln!(out, "Patch **{patch_version}**, batch **{batch}**\n")?;
            writeln!(out, "| id | name | pick | win | win given pick |")?;
            writeln!(out, "|---:|---|---:|---:|---:|")?;
            for entry in data {
                writeln!(
                    out,
                    "| {} | {} | {} ({}/{}) | {} ({}/{}) | {} |",
                    entry.id,
                    entry.name.as_deref().unwrap_or(""),
                    percent(entry.pick.rate),
                    entry.pick.count,
                    entry.pick.total,
                    percent(entry.win.rate),
                    entry.win.count,
                    entry.win.total,
                    percent(entry.win_given_pick)
                )?;
            }
        }
        Report::Recommend(Snapshot::Ready {
            patch_version,
            batch,
            data,
        }) => {
            writeln!(out, "Patch **{patch_version}**, batch **{batch}**\n")?;
            writeln!(out, "| card | name | score | rank |")?;
            writeln!(out, "|---:|---|---:|---:|")?;
            for recommendation in data {
                writeln!(
                    out,
                    "| {} | {} | {:.4} | {} |",
                    recommendation.card_id,
                    recommendation.name.as_deref().unwrap_or(""),
                    recommendation.score,
                    percent(recommendation.rank)
                )?;
            }
        }
        Report::Rebalance(Snapshot::ColdStart)
        | Report::Recommend(Snapshot::ColdStart)
        | Report::Indicator(Snapshot::ColdStart) => {
            writeln!(out, "_No complete batch yet._")?;
        }
        Report::Indicator(Snapshot::Ready {
            patch_version,
            batch,
            data,
        }) => {
            writeln!(out, "Patch **{patch_version}**, batch **{batch}**\n")?;
            markdown_documents(out, data)?;
        }
        Report::Matrices(Some(live)) => {
            writeln!(out, "Patch **{}**, live batch **{}**\n", live.patch_version, live.batch)?;
            markdown_documents(out, &live.documents)?;
        }
        other => {
            writeln!(out, "```json\n{}\n```", serde_json::to_string_pretty(other)?)?;
        }
    }
    Ok(())
}

fn markdown_documents(out: &mut dyn Write, documents: &BatchDocuments) -> Result<()> {
    for (title, docs) in [("Pick", &documents.pick), ("Win", &documents.win)] {
        writeln!(out, "## {title}\n")?;
        for doc in docs {
            writeln!(out, "- `{}`", document_line(doc))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftstat_engine::{CountRatio, EntryKind};

    fn rebalance() -> Report {
        Report::Rebalance(Snapshot::Ready {
            patch_version: "3".to_string(),
            batch: 2,
            data: vec![RebalanceEntry {
                kind: EntryKind::Card,
                id: 10,
                name: Some("Spark".to_string()),
                pick: CountRatio::new(3, 4),
                win: CountRatio::new(1, 2),
                win_given_pick: 1.0 / 3.0,
            }],
        })
    }

    #[test]
    fn json_report_wraps_in_envelope() {
        let mut buffer = Vec::new();
        generate_json_report(&mut buffer, Ok(&rebalance())).unwrap();
        let value: Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["isOk"], Value::Bool(true));
        assert_eq!(value["data"]["status"], "ready");
        assert_eq!(value["data"]["data"][0]["winGivenPick"].as_f64().map(|v| v > 0.33), Some(true));

        let mut buffer = Vec::new();
        let err = anyhow::anyhow!("class 9 is not in the pool");
        generate_json_report(&mut buffer, Err(&err)).unwrap();
        let value: Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["isOk"], Value::Bool(false));
        assert_eq!(value["data"], "class 9 is not in the pool");
    }

    #[test]
    fn markdown_rebalance_is_a_table() {
        let mut buffer = Vec::new();
        generate_markdown_report(&mut buffer, &rebalance()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("| 10 | Spark | 75.0% (3/4) | 50.0% (1/2) | 33.3% |"));
    }

    #[test]
    fn console_cold_start_is_explained() {
        let mut buffer = Vec::new();
        generate_console_report(&mut buffer, &Report::Recommend(Snapshot::ColdStart)).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("No complete batch yet"));
    }
}
