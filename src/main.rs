use clap::Parser;
use log::{info, warn};
use nlmsa::conservation::ConservationFilter;
use nlmsa::dump::{read_dump, write_dump};
use nlmsa::intersect::intersect_on;
use nlmsa::interval::Interval;
use nlmsa::paf::build_store;
use nlmsa::seqidx::SequenceIndex;
use nlmsa::sequence_index::{InMemorySequences, SequenceSource};
use nlmsa::slice::{GroupByIntervals, GroupBySequences, GroupedInterval, IntervalPair};
use nlmsa::snapshot;
use nlmsa::store::AlignmentStore;
use nlmsa::{NlmsaError, SeqId};
use rayon::ThreadPoolBuilder;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::num::NonZeroUsize;
use std::path::Path;

fn default_threads() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Number of threads for parallel processing.
    #[clap(short = 't', long, value_parser, default_value_t = default_threads())]
    num_threads: NonZeroUsize,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

/// Horizontal and vertical group-by options for queries
#[derive(Parser, Debug)]
struct GroupOpts {
    /// Group hits into alignment blocks before reporting them.
    #[clap(short = 'g', long, action)]
    group: bool,

    /// Longest source gap merged into one block
    #[clap(long, value_parser, default_value_t = 0, requires = "group")]
    maxgap: i64,

    /// Longest target insert merged into one block
    #[clap(long, value_parser, default_value_t = 0, requires = "group")]
    maxinsert: i64,

    /// Smallest target insert (negative values allow overlaps)
    #[clap(long, value_parser, default_value_t = 0, allow_hyphen_values = true, requires = "group")]
    mininsert: i64,

    /// Largest block size on either axis
    #[clap(long, value_parser, default_value_t = 500_000_000, requires = "group")]
    maxsize: i64,

    /// Use the generous merge preset (10000/10000/-10/50000)
    #[clap(long, action, conflicts_with_all = ["maxgap", "maxinsert", "mininsert", "maxsize"], requires = "group")]
    merge_most: bool,

    /// Merge every hit on a target into one block
    #[clap(long, action, requires = "group")]
    merge_all: bool,

    /// Minimum number of aligned sequences for a region to be reported
    #[clap(long, value_parser, default_value_t = 1, requires = "group")]
    min_aligned: usize,

    /// Minimum fraction of the sequences in a group aligned for a region to be reported
    #[clap(long, value_parser, default_value_t = 0.0, requires = "group")]
    p_min_aligned: f64,

    /// Target sequence groups swept separately, as `name,name;name,...`
    #[clap(long, value_parser, requires = "group")]
    seq_groups: Option<String>,

    /// Report only the source regions
    #[clap(long, action, requires = "group")]
    source_only: bool,

    /// With --source-only, cut regions at indels
    #[clap(long, action, requires = "group")]
    indel_cut: bool,

    /// FASTA files (plain or BGZF) holding the aligned sequences, for --min-identity
    #[clap(long, value_parser, num_args = 1.., requires = "group")]
    sequence_files: Option<Vec<String>>,

    /// Clip grouped blocks to their longest stretch of at least this identity
    #[clap(long, value_parser, requires_all = ["group", "sequence_files"])]
    min_identity: Option<f64>,

    /// Drop grouped blocks shorter than this on the source
    #[clap(long, value_parser, requires = "group")]
    min_block_size: Option<i64>,

    /// Drop grouped blocks longer than this on the source
    #[clap(long, value_parser, requires = "group")]
    max_block_size: Option<i64>,

    /// Drop grouped blocks with a smaller aligned fraction
    #[clap(long, value_parser, requires = "group")]
    min_aligned_fraction: Option<f64>,
}

impl GroupOpts {
    fn intervals(&self) -> GroupByIntervals {
        let base = if self.merge_most {
            GroupByIntervals::merge_most()
        } else {
            GroupByIntervals {
                maxgap: self.maxgap,
                maxinsert: self.maxinsert,
                mininsert: self.mininsert,
                maxsize: self.maxsize,
                ..GroupByIntervals::default()
            }
        };
        GroupByIntervals {
            merge_all: self.merge_all,
            ..base
        }
    }

    fn conservation(&self) -> ConservationFilter {
        ConservationFilter {
            p_identity_min: self.min_identity,
            min_align_size: self.min_block_size,
            max_align_size: self.max_block_size,
            p_aligned_min: self.min_aligned_fraction,
        }
    }

    fn sequences(&self, seq_index: &SequenceIndex) -> io::Result<GroupBySequences> {
        let seq_groups = match &self.seq_groups {
            Some(spec) => Some(parse_seq_groups(spec, seq_index)?),
            None => None,
        };
        Ok(GroupBySequences {
            min_aligned: self.min_aligned,
            p_min_aligned: self.p_min_aligned,
            source_only: self.source_only,
            indel_cut: self.indel_cut,
            seq_groups,
        })
    }
}

/// Build, query and combine nested interval alignment indexes.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Create an index from PAF files or a text dump
    Index {
        #[clap(flatten)]
        common: CommonOpts,

        /// PAF files to index (plain or BGZF-compressed)
        #[clap(short = 'a', long, value_parser, num_args = 1.., required_unless_present = "from_dump")]
        alignment_files: Vec<String>,

        /// Load a text dump directory instead of PAF files
        #[clap(long, value_parser, conflicts_with = "alignment_files")]
        from_dump: Option<String>,

        /// Output index file
        #[clap(short = 'i', long, value_parser)]
        index: String,

        /// Also index every alignment from its target side
        #[clap(short = 'b', long, action)]
        bidirectional: bool,
    },
    /// Query what aligns to a region
    Query {
        #[clap(flatten)]
        common: CommonOpts,

        /// Index file
        #[clap(short = 'i', long, value_parser)]
        index: String,

        /// Target range in the format `seq_name:start-end`
        #[clap(short = 'r', long, value_parser)]
        target_range: Option<String>,

        /// Path to the BED file containing target regions
        #[clap(short = 'b', long, value_parser)]
        target_bed: Option<String>,

        /// Output format: 'bed' (aligned intervals) or 'bedpe' (query and aligned intervals)
        #[clap(short = 'o', long, value_parser = ["bed", "bedpe"], default_value = "bed")]
        output_format: String,

        #[clap(flatten)]
        group: GroupOpts,
    },
    /// Write an index as a text dump directory
    Dump {
        #[clap(flatten)]
        common: CommonOpts,

        /// Index file
        #[clap(short = 'i', long, value_parser)]
        index: String,

        /// Output directory
        #[clap(short = 'o', long, value_parser)]
        output_dir: String,
    },
    /// Join two alignment sets on a shared anchor sequence
    Intersect {
        #[clap(flatten)]
        common: CommonOpts,

        /// PAF file aligning the anchor to the first set of sequences
        #[clap(short = 'l', long, value_parser)]
        left: String,

        /// PAF file aligning the anchor to the second set of sequences
        #[clap(short = 'r', long, value_parser)]
        right: String,

        /// Anchor sequence name; every shared sequence is used when omitted
        #[clap(short = 'A', long, value_parser)]
        anchor: Option<String>,
    },
    /// Print alignment statistics
    Stats {
        #[clap(flatten)]
        common: CommonOpts,

        /// Index file
        #[clap(short = 'i', long, value_parser)]
        index: String,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::Index {
            common,
            alignment_files,
            from_dump,
            index,
            bidirectional,
        } => {
            initialize(&common)?;
            let (store, seq_index) = match from_dump {
                Some(dir) => read_dump(Path::new(&dir))?,
                None => {
                    let mut seq_index = SequenceIndex::new();
                    let store = build_store(
                        &alignment_files,
                        common.num_threads,
                        bidirectional,
                        &mut seq_index,
                    )?;
                    (store, seq_index)
                }
            };
            snapshot::save(Path::new(&index), &store, &seq_index)?;
        }
        Args::Query {
            common,
            index,
            target_range,
            target_bed,
            output_format,
            group,
        } => {
            initialize(&common)?;
            let (store, mut seq_index) = snapshot::load(Path::new(&index))?;
            let sequences = match &group.sequence_files {
                Some(files) => InMemorySequences::from_fasta_files(files, &mut seq_index)?,
                None => InMemorySequences::new(),
            };
            let seq_opts = group.sequences(&seq_index)?;

            let targets = if let Some(target_range) = target_range {
                let (name, (start, end)) = parse_target_range(&target_range)?;
                vec![(name, (start, end), None)]
            } else if let Some(target_bed) = target_bed {
                let targets = parse_bed_file(&target_bed)?;
                info!("Parsed {} target ranges from BED file", targets.len());
                targets
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Either --target-range or --target-bed must be provided for query subcommand",
                ));
            };

            for (target_name, (start, end), name) in targets {
                let query = resolve_range(&seq_index, &target_name, start, end)?;
                let results = match perform_query(&store, &query, &group, &seq_opts, &sequences) {
                    Ok(results) => results,
                    Err(NlmsaError::EmptySlice(_)) | Err(NlmsaError::NotFound(_)) => {
                        warn!("Nothing aligns to {}:{}-{}", target_name, start, end);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                if output_format == "bedpe" {
                    output_results_bedpe(&seq_index, &results, name.as_deref());
                } else {
                    output_results_bed(&seq_index, &results);
                }
            }
        }
        Args::Dump {
            common,
            index,
            output_dir,
        } => {
            initialize(&common)?;
            let (store, seq_index) = snapshot::load(Path::new(&index))?;
            write_dump(Path::new(&output_dir), &store, &seq_index)?;
        }
        Args::Intersect {
            common,
            left,
            right,
            anchor,
        } => {
            initialize(&common)?;
            // one registry so that both stores agree on sequence ids
            let mut seq_index = SequenceIndex::new();
            let left = build_store(&[left], common.num_threads, true, &mut seq_index)?;
            let right = build_store(&[right], common.num_threads, true, &mut seq_index)?;
            let anchors = match anchor {
                Some(name) => vec![seq_index.get_id(&name).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("Anchor sequence {} not found", name),
                    )
                })?],
                None => left
                    .paths()
                    .into_iter()
                    .filter(|&p| right.contains_path(p))
                    .collect(),
            };
            if anchors.is_empty() {
                return Err(NlmsaError::PathMismatch(
                    "the alignment sets share no sequence".to_string(),
                )
                .into());
            }
            for anchor in anchors {
                let pairs: Vec<IntervalPair> = intersect_on(&left, &right, anchor)?
                    .into_iter()
                    // both sides aligned to themselves through the anchor
                    .filter(|p| p.src.seq != p.dest.seq)
                    .map(|p| IntervalPair {
                        source: p.src,
                        target: p.dest,
                    })
                    .collect();
                output_results_bedpe(&seq_index, &pairs, seq_index.get_name(anchor));
            }
        }
        Args::Stats { common, index } => {
            initialize(&common)?;
            let (store, seq_index) = snapshot::load(Path::new(&index))?;
            print_stats(&store, &seq_index);
        }
    }

    Ok(())
}

/// Initialize logger and thread pool based on common options
fn initialize(common: &CommonOpts) -> io::Result<()> {
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    ThreadPoolBuilder::new()
        .num_threads(common.num_threads.into())
        .build_global()
        .map_err(|e| io::Error::other(format!("Failed to build thread pool: {}", e)))
}

fn parse_target_range(target_range: &str) -> io::Result<(String, (i64, i64))> {
    let re = Regex::new(r"^(.+):(\d+)-(\d+)$").map_err(io::Error::other)?;
    let caps = re.captures(target_range).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "Target range format should be `seq_name:start-end`",
        )
    })?;
    let (start, end) = parse_range(&[&caps[2], &caps[3]])?;
    Ok((caps[1].to_string(), (start, end)))
}

fn parse_bed_file(bed_file: &str) -> io::Result<Vec<(String, (i64, i64), Option<String>)>> {
    let file = File::open(bed_file)?;
    let reader = BufReader::new(file);
    let mut ranges = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 3 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Invalid BED file format",
            ));
        }

        let (start, end) = parse_range(&parts[1..=2])?;
        let name = parts.get(3).map(|s| s.to_string());
        ranges.push((parts[0].to_string(), (start, end), name));
    }

    Ok(ranges)
}

fn parse_seq_groups(groups: &str, seq_index: &SequenceIndex) -> io::Result<Vec<Vec<SeqId>>> {
    groups
        .split(';')
        .filter(|g| !g.is_empty())
        .map(|group| {
            group
                .split(',')
                .map(|name| {
                    seq_index.get_id(name.trim()).ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::NotFound,
                            format!("Sequence {} in --seq-groups not found in index", name),
                        )
                    })
                })
                .collect()
        })
        .collect()
}

fn parse_range(range_parts: &[&str]) -> io::Result<(i64, i64)> {
    if range_parts.len() != 2 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Range format should be `start-end`",
        ));
    }

    let start = range_parts[0]
        .parse::<i64>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid start value"))?;
    let end = range_parts[1]
        .parse::<i64>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid end value"))?;

    if start >= end {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Start value must be less than end value",
        ));
    }

    Ok((start, end))
}

fn resolve_range(seq_index: &SequenceIndex, name: &str, start: i64, end: i64) -> io::Result<Interval> {
    let id = seq_index.get_id(name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Target name {} not found in index", name),
        )
    })?;
    if let Some(length) = seq_index.get_len_from_id(id) {
        if end > length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Target range end ({}) exceeds the target sequence length ({})",
                    end, length
                ),
            ));
        }
    }
    Ok(Interval::new(id, start, end)?)
}

fn perform_query(
    store: &AlignmentStore,
    query: &Interval,
    group: &GroupOpts,
    seq_opts: &GroupBySequences,
    sequences: &dyn SequenceSource,
) -> nlmsa::Result<Vec<IntervalPair>> {
    let slice = store.slice(query)?;
    if !group.group {
        return slice.mapped();
    }
    let blocks =
        slice.group_by_intervals_conserved(&group.intervals(), &group.conservation(), sequences)?;
    let edges = slice.group_by_sequences(&blocks, seq_opts)?;
    Ok(edges
        .into_iter()
        .map(|g| match g {
            GroupedInterval::Aligned { source, target, .. } => IntervalPair { source, target },
            GroupedInterval::Source(source) => IntervalPair {
                source,
                target: source,
            },
        })
        .collect())
}

fn seq_name(seq_index: &SequenceIndex, id: SeqId) -> String {
    seq_index
        .get_name(id)
        .map(str::to_string)
        .unwrap_or_else(|| id.to_string())
}

fn output_results_bed(seq_index: &SequenceIndex, results: &[IntervalPair]) {
    for pair in results {
        let t = &pair.target;
        println!(
            "{}\t{}\t{}\t.\t.\t{}",
            seq_name(seq_index, t.seq),
            t.start,
            t.stop,
            t.orientation.as_char()
        );
    }
}

fn output_results_bedpe(seq_index: &SequenceIndex, results: &[IntervalPair], name: Option<&str>) {
    for pair in results {
        let (s, t) = (&pair.source, &pair.target);
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t0\t{}\t{}",
            seq_name(seq_index, s.seq),
            s.start,
            s.stop,
            seq_name(seq_index, t.seq),
            t.start,
            t.stop,
            name.unwrap_or("."),
            s.orientation.as_char(),
            t.orientation.as_char()
        );
    }
}

fn print_stats(store: &AlignmentStore, seq_index: &SequenceIndex) {
    // Basic stats
    let num_sequences = seq_index.len();
    let total_sequence_length: i64 = seq_index.iter().filter_map(|(_, _, len)| len).sum();
    println!("Number of sequences: {}", num_sequences);
    println!("Total sequence length: {} bp", total_sequence_length);
    println!("Number of indexed paths: {}", store.n_paths());
    println!("Number of alignments: {}", store.len());
    println!("Bidirectional: {}", store.is_bidirectional());

    // Alignment distribution stats
    let mut alignments_per_seq: FxHashMap<SeqId, usize> = FxHashMap::default();
    for path in store.paths() {
        if let Ok(index) = store.get(path) {
            alignments_per_seq.insert(path, index.len());
        }
    }

    let mut entries: Vec<(SeqId, usize)> = alignments_per_seq.into_iter().collect();
    entries.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| natord::compare(&seq_name(seq_index, a.0), &seq_name(seq_index, b.0)))
    });

    if !entries.is_empty() {
        let sum: usize = entries.iter().map(|(_, count)| count).sum();
        let mean = sum as f64 / entries.len() as f64;

        let median = if entries.len() % 2 == 0 {
            let mid = entries.len() / 2;
            (entries[mid - 1].1 + entries[mid].1) as f64 / 2.0
        } else {
            entries[entries.len() / 2].1 as f64
        };
        println!("\nMean alignments per sequence: {:.2}", mean);
        println!("Median alignments per sequence: {:.2}", median);

        println!("\nTop sequences by number of alignments:");
        for (idx, (seq_id, count)) in entries.iter().take(5).enumerate() {
            println!("{}. {}: {} alignments", idx + 1, seq_name(seq_index, *seq_id), count);
        }
    }
}
