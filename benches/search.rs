use depgrep::{CompiledQuery, Corpus, SearchOptions, Target, search};
use divan::{Bencher, black_box};

fn main() {
    divan::main();
}

const SENTENCE: &str = "# constituency = (S (NP (DT The) (JJ old) (NN dog)) (VP (VBZ barks) (PP (IN at) (NP (DT the) (NN mailman)))) (. .))
1\tThe\tthe\tDET\tDT\t_\t3\tdet\t_\t_
2\told\told\tADJ\tJJ\t_\t3\tamod\t_\t_
3\tdog\tdog\tNOUN\tNN\t_\t4\tnsubj\t_\t_
4\tbarks\tbark\tVERB\tVBZ\t_\t0\troot\t_\t_
5\tat\tat\tADP\tIN\t_\t7\tcase\t_\t_
6\tthe\tthe\tDET\tDT\t_\t7\tdet\t_\t_
7\tmailman\tmailman\tNOUN\tNN\t_\t4\tobl\t_\t_
8\t.\t.\tPUNCT\t.\t_\t4\tpunct\t_\t_

";

fn corpus(n: usize) -> Corpus {
    Corpus::from_conllu_str(&SENTENCE.repeat(n)).unwrap()
}

#[divan::bench(args = [
    r#"p"VERB" -> f"nsubj""#,
    r#"l/^b/ ->> (p"NOUN" <- f"obl")"#,
    r#"*=v -> (f"nsubj" . (* <- =v))"#,
])]
fn dependency(bencher: Bencher, query: &str) {
    let corpus = corpus(2_000);
    let compiled = CompiledQuery::compile(query, Target::Dependency, true).unwrap();
    let options = SearchOptions::default();
    bencher.bench_local(|| black_box(search(&corpus, &compiled, &options).unwrap()));
}

#[divan::bench(args = ["NP", "NP < NN $ VP", "VP << (NP , IN)"])]
fn constituency(bencher: Bencher, query: &str) {
    let corpus = corpus(2_000);
    let compiled = CompiledQuery::compile(query, Target::Constituency, true).unwrap();
    let options = SearchOptions::default();
    bencher.bench_local(|| black_box(search(&corpus, &compiled, &options).unwrap()));
}

#[divan::bench(args = [1, 2, 4])]
fn threads(bencher: Bencher, threads: usize) {
    let corpus = corpus(2_000);
    let compiled = CompiledQuery::compile(r#"p"NOUN" <<- f"root""#, Target::Dependency, true).unwrap();
    let options = SearchOptions::default().with_threads(threads).with_chunk_size(64);
    bencher.bench_local(|| black_box(search(&corpus, &compiled, &options).unwrap()));
}
