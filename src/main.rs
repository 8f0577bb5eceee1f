use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fragtree::{
    calculator::SubtreeCalculator,
    critical_path::CriticalPathSubtreeCalculator,
    ftree::FragmentTree,
    graph::CombinatorialNode,
    loader,
    manipulator::remove_dangling_subtrees,
    molecule::MolecularGraph,
    prim::PrimSubtreeCalculator,
    scoring::AnnotatedPeakScoring,
    subtree::CombinatorialSubtree,
};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
enum Method {
    Prim,
    CriticalPath,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Molecules to fragment, as V2000 molfiles.
    paths: Vec<PathBuf>,

    /// Stop expanding fragments that needed more cut bonds than this.
    #[arg(long, default_value_t = 3)]
    max_bondbreaks: u16,

    /// Subtree extraction method.
    #[arg(short, long, value_enum, default_value_t = Method::CriticalPath)]
    method: Method,

    /// Observed fragment formulas as CSV rows `formula[,intensity]`.
    /// Without this, only the fragmentation graph is built.
    #[arg(short, long)]
    formulas: Option<PathBuf>,

    /// Emit the annotated tree as JSON instead of Newick.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    if cli.paths.is_empty() {
        bail!("no input files given");
    }

    let outputs: Vec<Result<String>> = cli
        .paths
        .par_iter()
        .map(|path| {
            let mol = loader::parse_molfile(path)
                .with_context(|| format!("reading {}", path.display()))?;
            process(&cli, &mol).with_context(|| format!("processing {}", path.display()))
        })
        .collect();
    for output in outputs {
        println!("{}", output?);
    }
    Ok(())
}

fn process(cli: &Cli, mol: &MolecularGraph) -> Result<String> {
    let max_breaks = cli.max_bondbreaks;
    let mut predicate =
        |node: &CombinatorialNode, _: usize, _: usize| node.bondbreaks() < max_breaks;

    let Some(formulas) = &cli.formulas else {
        // No reference formulas: report the graph dimensions.
        let scoring = fragtree::scoring::BondTypeScoring::new(mol);
        let fragmenter = fragtree::fragmenter::CombinatorialFragmenter::new(mol, scoring);
        let graph = fragmenter.create_combinatorial_fragmentation_graph(&mut predicate);
        return Ok(format!(
            "{}\t{} nodes\t{} edges",
            mol.formula(),
            graph.number_of_nodes(),
            graph.edge_count()
        ));
    };

    let tree = read_fragment_tree(formulas, mol)?;
    let scoring = AnnotatedPeakScoring::new(mol, &tree);
    let mut subtree = match cli.method {
        Method::Prim => {
            let mut calc = PrimSubtreeCalculator::new(mol, &tree, scoring);
            calc.initialize(&mut predicate)?;
            calc.compute_subtree()?;
            calc.into_subtree()?
        }
        Method::CriticalPath => {
            let mut calc = CriticalPathSubtreeCalculator::new(mol, &tree, scoring);
            calc.initialize(&mut predicate)?;
            calc.compute_subtree()?;
            calc.into_subtree()?
        }
    };
    let score = remove_dangling_subtrees(&mut subtree);
    info!(score, nodes = subtree.number_of_nodes(), "annotated tree");
    render(&subtree, cli.json)
}

fn read_fragment_tree(path: &PathBuf, mol: &MolecularGraph) -> Result<FragmentTree> {
    let mut tree = FragmentTree::new(mol.formula().clone());
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("reading {}", path.display()))?;
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let formula = record
            .get(0)
            .with_context(|| format!("empty row {} in {}", i + 1, path.display()))?
            .trim()
            .parse()
            .with_context(|| format!("row {} in {}", i + 1, path.display()))?;
        let intensity = match record.get(1) {
            Some(field) => field
                .trim()
                .parse()
                .with_context(|| format!("row {} in {}", i + 1, path.display()))?,
            None => 0.0,
        };
        tree.add_child(0, formula, intensity);
    }
    Ok(tree)
}

fn render(subtree: &CombinatorialSubtree, json: bool) -> Result<String> {
    if json {
        Ok(subtree.to_json()?)
    } else {
        Ok(subtree.to_newick())
    }
}
