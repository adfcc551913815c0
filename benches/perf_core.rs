use criterion::{black_box, criterion_group, criterion_main, Criterion};
use toolbox::generate::parse::parse_response;
use toolbox::generate::StructuralValidator;

fn synthetic_script(helper_count: usize) -> String {
    let mut code = String::from(
        "import os\nimport sys\nimport numpy as np\nfrom PIL import Image\nimport cv2\n\n\
         NAME = \"Synthetic\"\nDESCRIPTION = \"Benchmark script\"\n\
         INPUT_TYPES = \"Images (*.png *.jpg)\"\n\
         PARAMETERS = [{\"name\": \"scale\", \"type\": \"float\", \"default\": 0.5}]\n\n",
    );
    for i in 0..helper_count {
        code.push_str(&format!(
            "def helper_{i}(values):\n    total = 0\n    for v in values:\n        if v > {i}:\n            total += v\n    return total\n\n"
        ));
    }
    code.push_str(
        "def process_files(files, output_dir):\n    return [os.path.join(output_dir, os.path.basename(f)) for f in files]\n\n\
         def main():\n    process_files(sys.argv[1:], os.getcwd())\n\n\
         if __name__ == \"__main__\":\n    main()\n",
    );
    code
}

fn bench_validation(c: &mut Criterion) {
    let validator = StructuralValidator::new();
    let small = synthetic_script(5);
    let large = synthetic_script(200);

    c.bench_function("validate_structure_small", |b| {
        b.iter(|| validator.validate_structure(black_box(&small)))
    });
    c.bench_function("validate_structure_large", |b| {
        b.iter(|| validator.validate_structure(black_box(&large)))
    });
    c.bench_function("detect_external_packages_large", |b| {
        b.iter(|| validator.detect_external_packages(black_box(&large)))
    });
}

fn bench_parse_response(c: &mut Criterion) {
    let code = synthetic_script(50);
    let structured = serde_json::json!({
        "name": "Synthetic",
        "description": "Benchmark script",
        "packages": ["numpy", "opencv-python"],
        "code": code,
    })
    .to_string();
    let fenced = format!("Here you go:\n```python\n{}\n```\nEnjoy!", code);

    c.bench_function("parse_response_json", |b| {
        b.iter(|| parse_response(black_box(&structured)))
    });
    c.bench_function("parse_response_fenced", |b| {
        b.iter(|| parse_response(black_box(&fenced)))
    });
}

criterion_group!(benches, bench_validation, bench_parse_response);
criterion_main!(benches);
